//! Derives the rollback plan for a change-style migration.
//!
//! The forward sequence is walked last-to-first so that later operations are
//! undone before the ones they depend on (an index is dropped before its
//! table). Planning is all-or-nothing: the first operation without a safe
//! inverse fails the whole plan and nothing reaches the database.

use stratum_common::{Error, Result};

use crate::operation::Operation;

/// Returns the inverse of `operations`, in the order it must be executed.
pub fn invert(operations: &[Operation]) -> Result<Vec<Operation>> {
    operations
        .iter()
        .enumerate()
        .rev()
        .map(|(position, op)| invert_one(op).ok_or_else(|| irreversible(position, op)))
        .collect()
}

fn irreversible(position: usize, op: &Operation) -> Error {
    Error::IrreversibleOperation {
        position,
        operation: op.to_string(),
    }
}

fn invert_one(op: &Operation) -> Option<Operation> {
    let inverse = match op {
        Operation::CreateTable(def) => Operation::DropTable {
            name: def.name.clone(),
            definition: Some(def.clone()),
        },
        Operation::DropTable { definition, .. } => Operation::CreateTable(definition.clone()?),
        Operation::RenameTable { from, to } => Operation::RenameTable {
            from: to.clone(),
            to: from.clone(),
        },
        Operation::AddColumn { table, column } => Operation::DropColumn {
            table: table.clone(),
            column: column.name.clone(),
            definition: Some(column.clone()),
        },
        Operation::DropColumn {
            table, definition, ..
        } => Operation::AddColumn {
            table: table.clone(),
            column: definition.clone()?,
        },
        Operation::RenameColumn { table, from, to } => Operation::RenameColumn {
            table: table.clone(),
            from: to.clone(),
            to: from.clone(),
        },
        Operation::ChangeColumnType {
            table,
            column,
            to,
            from,
        } => Operation::ChangeColumnType {
            table: table.clone(),
            column: column.clone(),
            to: from.clone()?,
            from: Some(to.clone()),
        },
        Operation::AddIndex { table, index } => Operation::DropIndex {
            table: table.clone(),
            name: index.name.clone(),
            definition: Some(index.clone()),
        },
        Operation::DropIndex {
            table, definition, ..
        } => Operation::AddIndex {
            table: table.clone(),
            index: definition.clone()?,
        },
        Operation::AddForeignKey { table, foreign_key } => Operation::DropForeignKey {
            table: table.clone(),
            name: foreign_key.name.clone(),
            definition: Some(foreign_key.clone()),
        },
        Operation::DropForeignKey {
            table, definition, ..
        } => Operation::AddForeignKey {
            table: table.clone(),
            foreign_key: definition.clone()?,
        },
        Operation::ExecuteRawSql { .. } => return None,
    };
    Some(inverse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{
        ColumnDefinition, ForeignKeyDefinition, IndexDefinition, OperationKind, TableDefinition,
    };

    fn users_table() -> Operation {
        Operation::CreateTable(
            TableDefinition::new("users")
                .column(ColumnDefinition::new("id", "INTEGER").primary_key())
                .column(ColumnDefinition::new("email", "TEXT").not_null()),
        )
    }

    fn constructive_sequence() -> Vec<Operation> {
        vec![
            users_table(),
            Operation::CreateTable(
                TableDefinition::new("posts")
                    .column(ColumnDefinition::new("id", "INTEGER").primary_key())
                    .column(ColumnDefinition::new("user_id", "INTEGER")),
            ),
            Operation::AddColumn {
                table: "users".into(),
                column: ColumnDefinition::new("nickname", "TEXT"),
            },
            Operation::AddIndex {
                table: "users".into(),
                index: IndexDefinition::for_columns("users", ["email"]).unique(),
            },
            Operation::AddForeignKey {
                table: "posts".into(),
                foreign_key: ForeignKeyDefinition::new("user_id", "users", "id"),
            },
        ]
    }

    #[test]
    fn empty_sequence_inverts_to_empty() {
        assert!(invert(&[]).unwrap().is_empty());
    }

    #[test]
    fn inverse_runs_last_operation_first() {
        let forward = vec![
            users_table(),
            Operation::AddIndex {
                table: "users".into(),
                index: IndexDefinition::for_columns("users", ["email"]),
            },
        ];
        let inverse = invert(&forward).unwrap();
        let kinds: Vec<OperationKind> = inverse.iter().map(Operation::kind).collect();
        assert_eq!(kinds, vec![OperationKind::DropIndex, OperationKind::DropTable]);
    }

    #[test]
    fn inverting_twice_restores_constructive_sequences() {
        let forward = constructive_sequence();
        let twice = invert(&invert(&forward).unwrap()).unwrap();
        assert_eq!(twice, forward);
    }

    #[test]
    fn renames_swap_direction() {
        let forward = vec![
            Operation::RenameTable {
                from: "people".into(),
                to: "users".into(),
            },
            Operation::RenameColumn {
                table: "users".into(),
                from: "mail".into(),
                to: "email".into(),
            },
        ];
        let inverse = invert(&forward).unwrap();
        assert_eq!(
            inverse,
            vec![
                Operation::RenameColumn {
                    table: "users".into(),
                    from: "email".into(),
                    to: "mail".into(),
                },
                Operation::RenameTable {
                    from: "users".into(),
                    to: "people".into(),
                },
            ]
        );
    }

    #[test]
    fn change_column_type_needs_the_old_type() {
        let captured = Operation::ChangeColumnType {
            table: "users".into(),
            column: "age".into(),
            to: "BIGINT".into(),
            from: Some("INTEGER".into()),
        };
        let inverse = invert(std::slice::from_ref(&captured)).unwrap();
        assert_eq!(
            inverse,
            vec![Operation::ChangeColumnType {
                table: "users".into(),
                column: "age".into(),
                to: "INTEGER".into(),
                from: Some("BIGINT".into()),
            }]
        );

        let uncaptured = Operation::ChangeColumnType {
            table: "users".into(),
            column: "age".into(),
            to: "BIGINT".into(),
            from: None,
        };
        assert!(matches!(
            invert(&[uncaptured]),
            Err(Error::IrreversibleOperation { position: 0, .. })
        ));
    }

    #[test]
    fn authored_drop_column_is_irreversible() {
        let forward = vec![
            users_table(),
            Operation::DropColumn {
                table: "users".into(),
                column: "email".into(),
                definition: None,
            },
        ];
        match invert(&forward) {
            Err(Error::IrreversibleOperation {
                position,
                operation,
            }) => {
                assert_eq!(position, 1);
                assert_eq!(operation, "drop column email from users");
            }
            other => panic!("expected irreversible error, got {other:?}"),
        }
    }

    #[test]
    fn drop_table_and_raw_sql_are_irreversible() {
        let drop = Operation::DropTable {
            name: "users".into(),
            definition: None,
        };
        assert!(invert(&[drop]).is_err());

        let sql = Operation::ExecuteRawSql {
            sql: "UPDATE users SET active = 1".into(),
        };
        assert!(invert(&[users_table(), sql]).is_err());
    }

    #[test]
    fn failure_reports_the_first_operation_inverted() {
        // The walk is last-to-first, so the later offender is reported.
        let forward = vec![
            Operation::ExecuteRawSql {
                sql: "SELECT 1".into(),
            },
            users_table(),
            Operation::DropTable {
                name: "legacy".into(),
                definition: None,
            },
        ];
        match invert(&forward) {
            Err(Error::IrreversibleOperation { position, .. }) => assert_eq!(position, 2),
            other => panic!("expected irreversible error, got {other:?}"),
        }
    }
}
