//! An adapter that keeps the schema and ledger in memory.
//!
//! It validates every operation against its schema model the way a database
//! would (dropping a missing column fails), supports transactions by
//! snapshotting, and counts what it was asked to do. Raw SQL is accepted and
//! logged but not interpreted.

use std::collections::{BTreeMap, BTreeSet};

use stratum_common::{Error, Result, Version};

use crate::adapter::Adapter;
use crate::ledger::{InsertOutcome, LedgerEntry};
use crate::operation::{ColumnDefinition, ForeignKeyDefinition, IndexDefinition, Operation};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableState {
    pub columns: Vec<ColumnDefinition>,
    pub indexes: BTreeMap<String, IndexDefinition>,
    pub foreign_keys: BTreeMap<String, ForeignKeyDefinition>,
}

impl TableState {
    fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn column_mut(&mut self, name: &str) -> Option<&mut ColumnDefinition> {
        self.columns.iter_mut().find(|c| c.name == name)
    }
}

pub type SchemaState = BTreeMap<String, TableState>;

#[derive(Debug, Clone)]
struct Snapshot {
    schema: SchemaState,
    ledger: BTreeMap<Version, LedgerEntry>,
}

#[derive(Debug, Default)]
pub struct MemoryAdapter {
    schema: SchemaState,
    ledger: BTreeMap<Version, LedgerEntry>,
    snapshot: Option<Snapshot>,
    executed: Vec<Operation>,
    applied_elsewhere: BTreeSet<Version>,
    begun: usize,
    committed: usize,
    rolled_back: usize,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next insert of `version` report `AlreadyPresent`, as if a
    /// concurrent runner had committed it first.
    pub fn mark_applied_elsewhere(&mut self, version: Version) {
        self.applied_elsewhere.insert(version);
    }

    pub fn schema(&self) -> &SchemaState {
        &self.schema
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.schema.contains_key(table)
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.schema
            .get(table)
            .is_some_and(|t| t.column(column).is_some())
    }

    pub fn has_index(&self, table: &str, index: &str) -> bool {
        self.schema
            .get(table)
            .is_some_and(|t| t.indexes.contains_key(index))
    }

    /// Every operation `execute` was called with, including ones later
    /// rolled back or rejected.
    pub fn executed(&self) -> &[Operation] {
        &self.executed
    }

    pub fn executed_count(&self) -> usize {
        self.executed.len()
    }

    pub fn ledger_versions(&self) -> Vec<Version> {
        self.ledger.keys().copied().collect()
    }

    pub fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn transactions_begun(&self) -> usize {
        self.begun
    }

    pub fn transactions_committed(&self) -> usize {
        self.committed
    }

    pub fn transactions_rolled_back(&self) -> usize {
        self.rolled_back
    }

    fn table_mut(&mut self, table: &str) -> Result<&mut TableState> {
        self.schema
            .get_mut(table)
            .ok_or_else(|| Error::Adapter(format!("no such table: {table}")))
    }

    fn apply(&mut self, op: &Operation) -> Result<()> {
        match op {
            Operation::CreateTable(def) => {
                if self.schema.contains_key(&def.name) {
                    return Err(Error::Adapter(format!("table {} already exists", def.name)));
                }
                let mut seen = BTreeSet::new();
                for column in &def.columns {
                    if !seen.insert(column.name.as_str()) {
                        return Err(Error::Adapter(format!(
                            "duplicate column name: {}",
                            column.name
                        )));
                    }
                }
                let table = TableState {
                    columns: def.columns.clone(),
                    indexes: BTreeMap::new(),
                    foreign_keys: def
                        .foreign_keys
                        .iter()
                        .map(|fk| (fk.name.clone(), fk.clone()))
                        .collect(),
                };
                self.schema.insert(def.name.clone(), table);
            }
            Operation::DropTable { name, .. } => {
                if self.schema.remove(name).is_none() {
                    return Err(Error::Adapter(format!("no such table: {name}")));
                }
            }
            Operation::RenameTable { from, to } => {
                if self.schema.contains_key(to) {
                    return Err(Error::Adapter(format!("table {to} already exists")));
                }
                let table = self
                    .schema
                    .remove(from)
                    .ok_or_else(|| Error::Adapter(format!("no such table: {from}")))?;
                self.schema.insert(to.clone(), table);
            }
            Operation::AddColumn { table, column } => {
                let state = self.table_mut(table)?;
                if state.column(&column.name).is_some() {
                    return Err(Error::Adapter(format!(
                        "duplicate column name: {}",
                        column.name
                    )));
                }
                state.columns.push(column.clone());
            }
            Operation::DropColumn { table, column, .. } => {
                let state = self.table_mut(table)?;
                if let Some(index) = state.indexes.values().find(|i| i.columns.contains(column)) {
                    return Err(Error::Adapter(format!(
                        "cannot drop column {table}.{column}: used by index {}",
                        index.name
                    )));
                }
                if let Some(fk) = state
                    .foreign_keys
                    .values()
                    .find(|fk| fk.columns.contains(column))
                {
                    return Err(Error::Adapter(format!(
                        "cannot drop column {table}.{column}: used by foreign key {}",
                        fk.name
                    )));
                }
                let before = state.columns.len();
                state.columns.retain(|c| &c.name != column);
                if state.columns.len() == before {
                    return Err(Error::Adapter(format!("no such column: {table}.{column}")));
                }
            }
            Operation::RenameColumn { table, from, to } => {
                let state = self.table_mut(table)?;
                if state.column(to).is_some() {
                    return Err(Error::Adapter(format!("duplicate column name: {to}")));
                }
                let col = state
                    .column_mut(from)
                    .ok_or_else(|| Error::Adapter(format!("no such column: {table}.{from}")))?;
                col.name = to.clone();
                for index in state.indexes.values_mut() {
                    rename_in(&mut index.columns, from, to);
                }
                for fk in state.foreign_keys.values_mut() {
                    rename_in(&mut fk.columns, from, to);
                }
                for other in self.schema.values_mut() {
                    for fk in other.foreign_keys.values_mut() {
                        if &fk.referenced_table == table {
                            rename_in(&mut fk.referenced_columns, from, to);
                        }
                    }
                }
            }
            Operation::ChangeColumnType {
                table,
                column,
                to,
                from,
            } => {
                let state = self.table_mut(table)?;
                let col = state
                    .column_mut(column)
                    .ok_or_else(|| Error::Adapter(format!("no such column: {table}.{column}")))?;
                if let Some(expected) = from {
                    if !col.column_type.eq_ignore_ascii_case(expected) {
                        return Err(Error::Adapter(format!(
                            "column {table}.{column} has type {}, expected {expected}",
                            col.column_type
                        )));
                    }
                }
                col.column_type = to.clone();
            }
            Operation::AddIndex { table, index } => {
                let state = self.table_mut(table)?;
                if state.indexes.contains_key(&index.name) {
                    return Err(Error::Adapter(format!("index {} already exists", index.name)));
                }
                if let Some(missing) = index.columns.iter().find(|c| state.column(c).is_none()) {
                    return Err(Error::Adapter(format!("no such column: {table}.{missing}")));
                }
                state.indexes.insert(index.name.clone(), index.clone());
            }
            Operation::DropIndex { table, name, .. } => {
                let state = self.table_mut(table)?;
                if state.indexes.remove(name).is_none() {
                    return Err(Error::Adapter(format!("no such index: {name}")));
                }
            }
            Operation::AddForeignKey { table, foreign_key } => {
                if !self.schema.contains_key(&foreign_key.referenced_table) {
                    return Err(Error::Adapter(format!(
                        "no such table: {}",
                        foreign_key.referenced_table
                    )));
                }
                let state = self.table_mut(table)?;
                if state.foreign_keys.contains_key(&foreign_key.name) {
                    return Err(Error::Adapter(format!(
                        "foreign key {} already exists",
                        foreign_key.name
                    )));
                }
                state
                    .foreign_keys
                    .insert(foreign_key.name.clone(), foreign_key.clone());
            }
            Operation::DropForeignKey { table, name, .. } => {
                let state = self.table_mut(table)?;
                if state.foreign_keys.remove(name).is_none() {
                    return Err(Error::Adapter(format!("no such foreign key: {name}")));
                }
            }
            Operation::ExecuteRawSql { .. } => {}
        }
        Ok(())
    }
}

fn rename_in(columns: &mut [String], from: &str, to: &str) {
    for column in columns.iter_mut().filter(|c| c.as_str() == from) {
        *column = to.to_string();
    }
}

impl Adapter for MemoryAdapter {
    fn begin_transaction(&mut self) -> Result<()> {
        if self.snapshot.is_some() {
            return Err(Error::Adapter("transaction already open".into()));
        }
        self.snapshot = Some(Snapshot {
            schema: self.schema.clone(),
            ledger: self.ledger.clone(),
        });
        self.begun += 1;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.snapshot.take().is_none() {
            return Err(Error::Adapter("no transaction to commit".into()));
        }
        self.committed += 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        let snapshot = self
            .snapshot
            .take()
            .ok_or_else(|| Error::Adapter("no transaction to roll back".into()))?;
        self.schema = snapshot.schema;
        self.ledger = snapshot.ledger;
        self.rolled_back += 1;
        Ok(())
    }

    fn execute(&mut self, operation: &Operation) -> Result<()> {
        self.executed.push(operation.clone());
        self.apply(operation)
    }

    fn ledger_has_version(&mut self, version: Version) -> Result<bool> {
        Ok(self.ledger.contains_key(&version))
    }

    fn ledger_insert(&mut self, entry: &LedgerEntry) -> Result<InsertOutcome> {
        if self.applied_elsewhere.remove(&entry.version) || self.ledger.contains_key(&entry.version)
        {
            return Ok(InsertOutcome::AlreadyPresent);
        }
        self.ledger.insert(entry.version, entry.clone());
        Ok(InsertOutcome::Inserted)
    }

    fn ledger_delete(&mut self, version: Version) -> Result<()> {
        self.ledger.remove(&version);
        Ok(())
    }

    fn ledger_list(&mut self) -> Result<Vec<LedgerEntry>> {
        Ok(self.ledger.values().cloned().collect())
    }

    fn set_breakpoint(&mut self, version: Version, breakpoint: bool) -> Result<()> {
        let entry = self
            .ledger
            .get_mut(&version)
            .ok_or_else(|| Error::NotFound(format!("version {version} is not in the ledger")))?;
        entry.breakpoint = breakpoint;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::TableDefinition;
    use chrono::Utc;

    fn t1() -> Operation {
        Operation::CreateTable(
            TableDefinition::new("t1").column(ColumnDefinition::new("id", "INTEGER").primary_key()),
        )
    }

    #[test]
    fn rollback_restores_schema_and_ledger() {
        let mut adapter = MemoryAdapter::new();
        adapter.begin_transaction().unwrap();
        adapter.execute(&t1()).unwrap();
        adapter
            .ledger_insert(&LedgerEntry::skipped(Version::new(1), "T1", Utc::now()))
            .unwrap();
        adapter.rollback().unwrap();

        assert!(!adapter.has_table("t1"));
        assert!(adapter.ledger_versions().is_empty());
        assert_eq!(adapter.executed_count(), 1);
        assert_eq!(adapter.transactions_rolled_back(), 1);
    }

    #[test]
    fn rejects_dropping_missing_column() {
        let mut adapter = MemoryAdapter::new();
        adapter.execute(&t1()).unwrap();
        let err = adapter
            .execute(&Operation::DropColumn {
                table: "t1".into(),
                column: "x".into(),
                definition: None,
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "adapter error: no such column: t1.x");
    }

    fn t1_with_indexed_c() -> MemoryAdapter {
        let mut adapter = MemoryAdapter::new();
        adapter.execute(&t1()).unwrap();
        adapter
            .execute(&Operation::AddColumn {
                table: "t1".into(),
                column: ColumnDefinition::new("c", "TEXT"),
            })
            .unwrap();
        adapter
            .execute(&Operation::AddIndex {
                table: "t1".into(),
                index: IndexDefinition::for_columns("t1", ["c"]),
            })
            .unwrap();
        adapter
    }

    #[test]
    fn rejects_dropping_an_indexed_column() {
        let mut adapter = t1_with_indexed_c();
        let err = adapter
            .execute(&Operation::DropColumn {
                table: "t1".into(),
                column: "c".into(),
                definition: None,
            })
            .unwrap_err();
        assert!(matches!(err, Error::Adapter(ref msg) if msg.contains("used by index idx_t1_c")));
        assert!(adapter.has_column("t1", "c"));
        assert!(adapter.has_index("t1", "idx_t1_c"));
    }

    #[test]
    fn rejects_dropping_a_foreign_key_column() {
        let mut adapter = MemoryAdapter::new();
        adapter.execute(&t1()).unwrap();
        adapter
            .execute(&Operation::CreateTable(
                TableDefinition::new("t2")
                    .column(ColumnDefinition::new("t1_id", "INTEGER"))
                    .foreign_key(ForeignKeyDefinition::new("t1_id", "t1", "id")),
            ))
            .unwrap();
        let err = adapter
            .execute(&Operation::DropColumn {
                table: "t2".into(),
                column: "t1_id".into(),
                definition: None,
            })
            .unwrap_err();
        assert!(matches!(err, Error::Adapter(ref msg) if msg.contains("foreign key fk_t1_id_t1")));
    }

    #[test]
    fn renaming_a_column_follows_into_indexes_and_foreign_keys() {
        let mut adapter = t1_with_indexed_c();
        adapter
            .execute(&Operation::CreateTable(
                TableDefinition::new("t2")
                    .column(ColumnDefinition::new("t1_c", "TEXT"))
                    .foreign_key(ForeignKeyDefinition::new("t1_c", "t1", "c")),
            ))
            .unwrap();
        adapter
            .execute(&Operation::RenameColumn {
                table: "t1".into(),
                from: "c".into(),
                to: "d".into(),
            })
            .unwrap();

        let t1 = &adapter.schema()["t1"];
        assert_eq!(t1.indexes["idx_t1_c"].columns, vec!["d".to_string()]);
        let t2 = &adapter.schema()["t2"];
        assert_eq!(
            t2.foreign_keys["fk_t1_c_t1"].referenced_columns,
            vec!["d".to_string()]
        );

        adapter
            .execute(&Operation::DropIndex {
                table: "t1".into(),
                name: "idx_t1_c".into(),
                definition: None,
            })
            .unwrap();
        adapter
            .execute(&Operation::DropColumn {
                table: "t1".into(),
                column: "d".into(),
                definition: None,
            })
            .unwrap();
        assert!(!adapter.has_column("t1", "d"));
    }

    #[test]
    fn nested_transactions_are_rejected() {
        let mut adapter = MemoryAdapter::new();
        adapter.begin_transaction().unwrap();
        assert!(adapter.begin_transaction().is_err());
        adapter.commit().unwrap();
        assert!(adapter.commit().is_err());
    }

    #[test]
    fn applied_elsewhere_reports_already_present_once() {
        let mut adapter = MemoryAdapter::new();
        adapter.mark_applied_elsewhere(Version::new(3));
        let entry = LedgerEntry::skipped(Version::new(3), "Three", Utc::now());
        assert_eq!(adapter.ledger_insert(&entry).unwrap(), InsertOutcome::AlreadyPresent);
        assert_eq!(adapter.ledger_insert(&entry).unwrap(), InsertOutcome::Inserted);
    }

    #[test]
    fn breakpoint_on_unknown_version_is_not_found() {
        let mut adapter = MemoryAdapter::new();
        assert!(matches!(
            adapter.set_breakpoint(Version::new(9), true),
            Err(Error::NotFound(_))
        ));
    }
}
