//! Renders schema operations as SQLite statements.

use stratum_common::{Error, Result};
use stratum_core::{ColumnDefinition, ForeignKeyDefinition, Operation};

/// Quotes an identifier for SQLite, doubling embedded quotes.
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn quote_list(idents: &[String]) -> String {
    idents.iter().map(|i| quote(i)).collect::<Vec<_>>().join(", ")
}

pub fn column_sql(column: &ColumnDefinition) -> String {
    let mut sql = format!("{} {}", quote(&column.name), column.column_type);
    if column.primary_key {
        sql.push_str(" PRIMARY KEY");
    }
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if column.unique && !column.primary_key {
        sql.push_str(" UNIQUE");
    }
    if let Some(default) = &column.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(default);
    }
    sql
}

fn foreign_key_sql(fk: &ForeignKeyDefinition) -> String {
    let mut sql = format!(
        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        quote(&fk.name),
        quote_list(&fk.columns),
        quote(&fk.referenced_table),
        quote_list(&fk.referenced_columns)
    );
    if let Some(action) = &fk.on_delete {
        sql.push_str(" ON DELETE ");
        sql.push_str(action);
    }
    sql
}

/// The SQL for one operation. Operations SQLite can only express by
/// rebuilding the table are rejected.
pub fn render(op: &Operation) -> Result<String> {
    let sql = match op {
        Operation::CreateTable(def) => {
            let mut parts: Vec<String> = def.columns.iter().map(column_sql).collect();
            parts.extend(def.foreign_keys.iter().map(foreign_key_sql));
            format!("CREATE TABLE {} ({})", quote(&def.name), parts.join(", "))
        }
        Operation::DropTable { name, .. } => format!("DROP TABLE {}", quote(name)),
        Operation::RenameTable { from, to } => {
            format!("ALTER TABLE {} RENAME TO {}", quote(from), quote(to))
        }
        Operation::AddColumn { table, column } => {
            format!("ALTER TABLE {} ADD COLUMN {}", quote(table), column_sql(column))
        }
        Operation::DropColumn { table, column, .. } => {
            format!("ALTER TABLE {} DROP COLUMN {}", quote(table), quote(column))
        }
        Operation::RenameColumn { table, from, to } => format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            quote(table),
            quote(from),
            quote(to)
        ),
        Operation::AddIndex { table, index } => format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            quote(&index.name),
            quote(table),
            quote_list(&index.columns)
        ),
        Operation::DropIndex { name, .. } => format!("DROP INDEX {}", quote(name)),
        Operation::ChangeColumnType { .. }
        | Operation::AddForeignKey { .. }
        | Operation::DropForeignKey { .. } => {
            return Err(Error::Adapter(format!(
                "sqlite cannot {op} without rebuilding the table; use an up/down migration with raw SQL"
            )));
        }
        Operation::ExecuteRawSql { sql } => sql.clone(),
    };
    Ok(sql)
}
