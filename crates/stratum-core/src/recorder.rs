use stratum_common::Result;
use tracing::debug;

use crate::adapter::Adapter;
use crate::inversion::invert;
use crate::operation::{
    ColumnDefinition, ForeignKeyDefinition, IndexDefinition, Operation, TableDefinition,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// Collects the schema operations a migration body issues without running
/// them. Nothing touches the database until [`Recorder::flush`].
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    operations: Vec<Operation>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn into_operations(self) -> Vec<Operation> {
        self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// The operations to execute for `direction`. Reverse plans fail with
    /// `IrreversibleOperation` when any recorded operation has no inverse.
    pub fn plan(&self, direction: Direction) -> Result<Vec<Operation>> {
        match direction {
            Direction::Forward => Ok(self.operations.clone()),
            Direction::Reverse => invert(&self.operations),
        }
    }

    /// Plans for `direction` and replays the plan against `adapter`.
    /// Returns the number of operations executed.
    pub fn flush<A: Adapter + ?Sized>(&self, adapter: &mut A, direction: Direction) -> Result<usize> {
        let plan = self.plan(direction)?;
        replay(adapter, &plan)
    }

    pub fn create_table(&mut self, definition: TableDefinition) {
        self.record(Operation::CreateTable(definition));
    }

    /// Irreversible: the table definition is not captured.
    pub fn drop_table(&mut self, name: impl Into<String>) {
        self.record(Operation::DropTable {
            name: name.into(),
            definition: None,
        });
    }

    pub fn rename_table(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.record(Operation::RenameTable {
            from: from.into(),
            to: to.into(),
        });
    }

    pub fn add_column(&mut self, table: impl Into<String>, column: ColumnDefinition) {
        self.record(Operation::AddColumn {
            table: table.into(),
            column,
        });
    }

    /// Irreversible: the column definition is not captured.
    pub fn drop_column(&mut self, table: impl Into<String>, column: impl Into<String>) {
        self.record(Operation::DropColumn {
            table: table.into(),
            column: column.into(),
            definition: None,
        });
    }

    pub fn rename_column(
        &mut self,
        table: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) {
        self.record(Operation::RenameColumn {
            table: table.into(),
            from: from.into(),
            to: to.into(),
        });
    }

    /// Irreversible unless the old type is supplied via
    /// [`Recorder::change_column_type_from`].
    pub fn change_column_type(
        &mut self,
        table: impl Into<String>,
        column: impl Into<String>,
        to: impl Into<String>,
    ) {
        self.record(Operation::ChangeColumnType {
            table: table.into(),
            column: column.into(),
            to: to.into(),
            from: None,
        });
    }

    pub fn change_column_type_from(
        &mut self,
        table: impl Into<String>,
        column: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) {
        self.record(Operation::ChangeColumnType {
            table: table.into(),
            column: column.into(),
            to: to.into(),
            from: Some(from.into()),
        });
    }

    pub fn add_index(&mut self, table: impl Into<String>, index: IndexDefinition) {
        self.record(Operation::AddIndex {
            table: table.into(),
            index,
        });
    }

    /// Takes the full definition so the drop can be reversed.
    pub fn drop_index(&mut self, table: impl Into<String>, index: IndexDefinition) {
        self.record(Operation::DropIndex {
            table: table.into(),
            name: index.name.clone(),
            definition: Some(index),
        });
    }

    pub fn add_foreign_key(&mut self, table: impl Into<String>, foreign_key: ForeignKeyDefinition) {
        self.record(Operation::AddForeignKey {
            table: table.into(),
            foreign_key,
        });
    }

    pub fn drop_foreign_key(&mut self, table: impl Into<String>, foreign_key: ForeignKeyDefinition) {
        self.record(Operation::DropForeignKey {
            table: table.into(),
            name: foreign_key.name.clone(),
            definition: Some(foreign_key),
        });
    }

    /// Raw SQL is opaque, so change-style migrations using it cannot be
    /// rolled back.
    pub fn execute(&mut self, sql: impl Into<String>) {
        self.record(Operation::ExecuteRawSql { sql: sql.into() });
    }
}

/// Executes `plan` in list order, stopping at the first adapter error.
pub fn replay<A: Adapter + ?Sized>(adapter: &mut A, plan: &[Operation]) -> Result<usize> {
    for op in plan {
        debug!("executing: {op}");
        adapter.execute(op)?;
    }
    Ok(plan.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAdapter;
    use crate::operation::OperationKind;
    use stratum_common::Error;

    fn t1() -> TableDefinition {
        TableDefinition::new("t1").column(ColumnDefinition::new("id", "INTEGER").primary_key())
    }

    #[test]
    fn record_keeps_issue_order_and_touches_nothing() {
        let mut recorder = Recorder::new();
        recorder.create_table(t1());
        recorder.add_column("t1", ColumnDefinition::new("c", "TEXT"));
        recorder.add_index("t1", IndexDefinition::for_columns("t1", ["c"]));

        let kinds: Vec<OperationKind> = recorder.operations().iter().map(Operation::kind).collect();
        assert_eq!(
            kinds,
            vec![
                OperationKind::CreateTable,
                OperationKind::AddColumn,
                OperationKind::AddIndex
            ]
        );
        assert_eq!(recorder.len(), 3);
    }

    #[test]
    fn forward_flush_replays_in_order() {
        let mut adapter = MemoryAdapter::new();
        let mut recorder = Recorder::new();
        recorder.create_table(t1());
        recorder.add_column("t1", ColumnDefinition::new("c", "TEXT"));

        let executed = recorder.flush(&mut adapter, Direction::Forward).unwrap();
        assert_eq!(executed, 2);
        assert!(adapter.has_column("t1", "c"));
    }

    #[test]
    fn reverse_flush_undoes_forward_flush() {
        let mut adapter = MemoryAdapter::new();
        let mut recorder = Recorder::new();
        recorder.create_table(t1());
        recorder.add_index("t1", IndexDefinition::for_columns("t1", ["id"]));
        recorder.rename_table("t1", "t2");

        recorder.flush(&mut adapter, Direction::Forward).unwrap();
        assert!(adapter.has_table("t2"));

        recorder.flush(&mut adapter, Direction::Reverse).unwrap();
        assert!(adapter.schema().is_empty());
    }

    #[test]
    fn reverse_flush_of_irreversible_log_issues_no_calls() {
        let mut adapter = MemoryAdapter::new();
        let mut recorder = Recorder::new();
        recorder.create_table(t1());
        recorder.drop_column("t1", "id");

        let err = recorder.flush(&mut adapter, Direction::Reverse).unwrap_err();
        assert!(matches!(err, Error::IrreversibleOperation { position: 1, .. }));
        assert_eq!(adapter.executed_count(), 0);
    }

    #[test]
    fn drop_index_captures_its_definition() {
        let mut recorder = Recorder::new();
        recorder.drop_index("t1", IndexDefinition::for_columns("t1", ["c"]));
        let inverse = recorder.plan(Direction::Reverse).unwrap();
        assert_eq!(inverse[0].kind(), OperationKind::AddIndex);
    }
}
