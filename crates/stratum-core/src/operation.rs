use std::fmt;

use serde::{Deserialize, Serialize};

/// A column as it should exist after an operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub default: Option<String>,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            nullable: true,
            primary_key: false,
            unique: false,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Default expression, passed through to the adapter verbatim.
    pub fn default_value(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexDefinition {
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    /// Index named `idx_<table>_<col1>_<col2>...`.
    pub fn for_columns<I, S>(table: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        Self {
            name: format!("idx_{}_{}", table, columns.join("_")),
            columns,
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    #[serde(default)]
    pub on_delete: Option<String>,
}

impl ForeignKeyDefinition {
    /// Single-column reference, named `fk_<column>_<referenced_table>`.
    pub fn new(
        column: impl Into<String>,
        referenced_table: impl Into<String>,
        referenced_column: impl Into<String>,
    ) -> Self {
        let column = column.into();
        let referenced_table = referenced_table.into();
        Self {
            name: format!("fk_{column}_{referenced_table}"),
            columns: vec![column],
            referenced_table,
            referenced_columns: vec![referenced_column.into()],
            on_delete: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn on_delete(mut self, action: impl Into<String>) -> Self {
        self.on_delete = Some(action.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyDefinition>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    pub fn foreign_key(mut self, foreign_key: ForeignKeyDefinition) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }
}

/// One recorded schema change.
///
/// Destructive variants carry an optional captured definition of what they
/// remove. Only operations that carry it can be inverted; the inversion
/// engine always fills it in for the drops it emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    CreateTable(TableDefinition),
    DropTable {
        name: String,
        #[serde(default)]
        definition: Option<TableDefinition>,
    },
    RenameTable {
        from: String,
        to: String,
    },
    AddColumn {
        table: String,
        column: ColumnDefinition,
    },
    DropColumn {
        table: String,
        column: String,
        #[serde(default)]
        definition: Option<ColumnDefinition>,
    },
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },
    ChangeColumnType {
        table: String,
        column: String,
        to: String,
        #[serde(default)]
        from: Option<String>,
    },
    AddIndex {
        table: String,
        index: IndexDefinition,
    },
    DropIndex {
        table: String,
        name: String,
        #[serde(default)]
        definition: Option<IndexDefinition>,
    },
    AddForeignKey {
        table: String,
        foreign_key: ForeignKeyDefinition,
    },
    DropForeignKey {
        table: String,
        name: String,
        #[serde(default)]
        definition: Option<ForeignKeyDefinition>,
    },
    #[serde(rename = "execute")]
    ExecuteRawSql {
        sql: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    CreateTable,
    DropTable,
    RenameTable,
    AddColumn,
    DropColumn,
    RenameColumn,
    ChangeColumnType,
    AddIndex,
    DropIndex,
    AddForeignKey,
    DropForeignKey,
    ExecuteRawSql,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::CreateTable(_) => OperationKind::CreateTable,
            Operation::DropTable { .. } => OperationKind::DropTable,
            Operation::RenameTable { .. } => OperationKind::RenameTable,
            Operation::AddColumn { .. } => OperationKind::AddColumn,
            Operation::DropColumn { .. } => OperationKind::DropColumn,
            Operation::RenameColumn { .. } => OperationKind::RenameColumn,
            Operation::ChangeColumnType { .. } => OperationKind::ChangeColumnType,
            Operation::AddIndex { .. } => OperationKind::AddIndex,
            Operation::DropIndex { .. } => OperationKind::DropIndex,
            Operation::AddForeignKey { .. } => OperationKind::AddForeignKey,
            Operation::DropForeignKey { .. } => OperationKind::DropForeignKey,
            Operation::ExecuteRawSql { .. } => OperationKind::ExecuteRawSql,
        }
    }

    /// The table this operation touches, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            Operation::CreateTable(def) => Some(&def.name),
            Operation::DropTable { name, .. } => Some(name),
            Operation::RenameTable { from, .. } => Some(from),
            Operation::AddColumn { table, .. }
            | Operation::DropColumn { table, .. }
            | Operation::RenameColumn { table, .. }
            | Operation::ChangeColumnType { table, .. }
            | Operation::AddIndex { table, .. }
            | Operation::DropIndex { table, .. }
            | Operation::AddForeignKey { table, .. }
            | Operation::DropForeignKey { table, .. } => Some(table),
            Operation::ExecuteRawSql { .. } => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CreateTable(def) => write!(f, "create table {}", def.name),
            Operation::DropTable { name, .. } => write!(f, "drop table {name}"),
            Operation::RenameTable { from, to } => write!(f, "rename table {from} to {to}"),
            Operation::AddColumn { table, column } => {
                write!(f, "add column {} {} to {table}", column.name, column.column_type)
            }
            Operation::DropColumn { table, column, .. } => {
                write!(f, "drop column {column} from {table}")
            }
            Operation::RenameColumn { table, from, to } => {
                write!(f, "rename column {table}.{from} to {to}")
            }
            Operation::ChangeColumnType {
                table,
                column,
                to,
                from,
            } => match from {
                Some(from) => write!(f, "change column {table}.{column} from {from} to {to}"),
                None => write!(f, "change column {table}.{column} to {to}"),
            },
            Operation::AddIndex { table, index } => {
                write!(f, "add index {} on {table} ({})", index.name, index.columns.join(", "))
            }
            Operation::DropIndex { table, name, .. } => write!(f, "drop index {name} on {table}"),
            Operation::AddForeignKey { table, foreign_key } => write!(
                f,
                "add foreign key {} on {table} referencing {}",
                foreign_key.name, foreign_key.referenced_table
            ),
            Operation::DropForeignKey { table, name, .. } => {
                write!(f, "drop foreign key {name} on {table}")
            }
            Operation::ExecuteRawSql { sql } => {
                let first_line = sql.lines().next().unwrap_or("").trim();
                write!(f, "execute sql `{first_line}`")
            }
        }
    }
}
