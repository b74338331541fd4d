use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use stratum_common::{Error, Result, Version};
use stratum_core::{Adapter, InsertOutcome, LedgerEntry, Operation};
use tracing::{debug, info};

use crate::sql::{quote, render};

/// Runs migrations against a SQLite database and keeps the ledger in a table
/// of the same database, so DDL and ledger writes share one transaction.
pub struct SqliteAdapter {
    conn: Connection,
    ledger_table: String,
}

impl SqliteAdapter {
    pub fn open(db_path: &Path, ledger_table: &str) -> Result<Self> {
        info!("opening database at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Adapter(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Adapter(format!("failed to set pragmas: {e}")))?;

        Self::with_connection(conn, ledger_table)
    }

    pub fn in_memory(ledger_table: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Adapter(format!("failed to open in-memory database: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Adapter(format!("failed to set pragmas: {e}")))?;

        Self::with_connection(conn, ledger_table)
    }

    fn with_connection(conn: Connection, ledger_table: &str) -> Result<Self> {
        validate_table_name(ledger_table)?;
        let adapter = Self {
            conn,
            ledger_table: ledger_table.to_string(),
        };
        adapter.ensure_ledger()?;
        Ok(adapter)
    }

    fn ensure_ledger(&self) -> Result<()> {
        self.conn
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    version INTEGER PRIMARY KEY,
                    migration_name TEXT NOT NULL,
                    start_time TEXT NOT NULL,
                    end_time TEXT NOT NULL,
                    breakpoint INTEGER NOT NULL DEFAULT 0
                );",
                self.ledger()
            ))
            .map_err(|e| Error::Adapter(format!("failed to create ledger table: {e}")))?;
        Ok(())
    }

    fn ledger(&self) -> String {
        quote(&self.ledger_table)
    }

    pub fn ledger_table(&self) -> &str {
        &self.ledger_table
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        self.schema_object_exists("table", table)
    }

    pub fn index_exists(&self, index: &str) -> Result<bool> {
        self.schema_object_exists("index", index)
    }

    fn schema_object_exists(&self, kind: &str, name: &str) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = ?1 AND name = ?2",
                params![kind, name],
                |row| row.get(0),
            )
            .map_err(|e| Error::Adapter(format!("failed to inspect schema: {e}")))?;
        Ok(count > 0)
    }

    /// Column names of `table` in declaration order; empty when the table
    /// does not exist.
    pub fn column_names(&self, table: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
            .map_err(|e| Error::Adapter(format!("failed to prepare query: {e}")))?;
        let names = stmt
            .query_map(params![table], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Adapter(format!("failed to list columns: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Adapter(format!("failed to read column: {e}")))?;
        Ok(names)
    }

    /// User tables, excluding the ledger and SQLite internals.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table'
                 AND name NOT LIKE 'sqlite_%' AND name != ?1 ORDER BY name",
            )
            .map_err(|e| Error::Adapter(format!("failed to prepare query: {e}")))?;
        let names = stmt
            .query_map(params![self.ledger_table], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Adapter(format!("failed to list tables: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Adapter(format!("failed to read table name: {e}")))?;
        Ok(names)
    }
}

impl Adapter for SqliteAdapter {
    fn begin_transaction(&mut self) -> Result<()> {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| Error::Adapter(format!("failed to begin transaction: {e}")))
    }

    fn commit(&mut self) -> Result<()> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| Error::Adapter(format!("failed to commit: {e}")))
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|e| Error::Adapter(format!("failed to roll back: {e}")))
    }

    fn execute(&mut self, operation: &Operation) -> Result<()> {
        let sql = render(operation)?;
        debug!("sql: {sql}");
        self.conn
            .execute_batch(&sql)
            .map_err(|e| Error::Adapter(format!("failed to {operation}: {e}")))
    }

    fn ledger_has_version(&mut self, version: Version) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE version = ?1", self.ledger()),
                params![to_sql_version(version)?],
                |_| Ok(()),
            )
            .optional()
            .map_err(|e| Error::Adapter(format!("failed to query ledger: {e}")))?;
        Ok(found.is_some())
    }

    fn ledger_insert(&mut self, entry: &LedgerEntry) -> Result<InsertOutcome> {
        let changed = self
            .conn
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (version, migration_name, start_time, end_time, breakpoint)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    self.ledger()
                ),
                params![
                    to_sql_version(entry.version)?,
                    entry.migration_name,
                    entry.start_time.to_rfc3339(),
                    entry.end_time.to_rfc3339(),
                    entry.breakpoint,
                ],
            )
            .map_err(|e| Error::Adapter(format!("failed to write ledger entry: {e}")))?;

        Ok(if changed == 0 {
            InsertOutcome::AlreadyPresent
        } else {
            InsertOutcome::Inserted
        })
    }

    fn ledger_delete(&mut self, version: Version) -> Result<()> {
        self.conn
            .execute(
                &format!("DELETE FROM {} WHERE version = ?1", self.ledger()),
                params![to_sql_version(version)?],
            )
            .map_err(|e| Error::Adapter(format!("failed to delete ledger entry: {e}")))?;
        Ok(())
    }

    fn ledger_list(&mut self) -> Result<Vec<LedgerEntry>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT version, migration_name, start_time, end_time, breakpoint
                 FROM {} ORDER BY version ASC",
                self.ledger()
            ))
            .map_err(|e| Error::Adapter(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, bool>(4)?,
                ))
            })
            .map_err(|e| Error::Adapter(format!("failed to read ledger: {e}")))?;

        let mut entries = Vec::new();
        for row in rows {
            let (version, name, start, end, breakpoint) =
                row.map_err(|e| Error::Adapter(format!("failed to read ledger row: {e}")))?;
            let version = u64::try_from(version)
                .map(Version::new)
                .map_err(|_| Error::Adapter(format!("negative version {version} in ledger")))?;
            entries.push(LedgerEntry {
                version,
                migration_name: name,
                start_time: parse_datetime(&start)?,
                end_time: parse_datetime(&end)?,
                breakpoint,
            });
        }
        Ok(entries)
    }

    fn set_breakpoint(&mut self, version: Version, breakpoint: bool) -> Result<()> {
        let changed = self
            .conn
            .execute(
                &format!(
                    "UPDATE {} SET breakpoint = ?1 WHERE version = ?2",
                    self.ledger()
                ),
                params![breakpoint, to_sql_version(version)?],
            )
            .map_err(|e| Error::Adapter(format!("failed to update breakpoint: {e}")))?;
        if changed == 0 {
            return Err(Error::NotFound(format!(
                "version {version} is not in the ledger"
            )));
        }
        Ok(())
    }
}

fn validate_table_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid ledger table name {name:?}")))
    }
}

fn to_sql_version(version: Version) -> Result<i64> {
    i64::try_from(version.get())
        .map_err(|_| Error::Adapter(format!("version {version} does not fit in a SQLite integer")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // SQLite datetime('now') produces "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|naive| naive.and_utc())
        })
        .map_err(|e| Error::Adapter(format!("invalid ledger timestamp {s:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::{ColumnDefinition, IndexDefinition, TableDefinition};

    fn adapter() -> SqliteAdapter {
        SqliteAdapter::in_memory("schema_ledger").unwrap()
    }

    fn users() -> Operation {
        Operation::CreateTable(
            TableDefinition::new("users")
                .column(ColumnDefinition::new("id", "INTEGER").primary_key())
                .column(ColumnDefinition::new("email", "TEXT")),
        )
    }

    #[test]
    fn executes_ddl_and_introspects() {
        let mut db = adapter();
        db.execute(&users()).unwrap();
        db.execute(&Operation::AddIndex {
            table: "users".into(),
            index: IndexDefinition::for_columns("users", ["email"]),
        })
        .unwrap();

        assert!(db.table_exists("users").unwrap());
        assert_eq!(db.column_names("users").unwrap(), vec!["id", "email"]);
        assert!(db.index_exists("idx_users_email").unwrap());
        assert_eq!(db.table_names().unwrap(), vec!["users"]);
    }

    #[test]
    fn rollback_discards_ddl_and_ledger_writes() {
        let mut db = adapter();
        db.begin_transaction().unwrap();
        assert!(db.in_transaction());
        db.execute(&users()).unwrap();
        let now = Utc::now();
        db.ledger_insert(&LedgerEntry::new(Version::new(1), "CreateUsers", now, now))
            .unwrap();
        db.rollback().unwrap();

        assert!(!db.in_transaction());
        assert!(!db.table_exists("users").unwrap());
        assert!(!db.ledger_has_version(Version::new(1)).unwrap());
    }

    #[test]
    fn ledger_round_trip_and_duplicate_insert() {
        let mut db = adapter();
        let start = Utc::now();
        let entry = LedgerEntry::new(Version::new(20240101120000), "CreateUsers", start, start);
        assert_eq!(db.ledger_insert(&entry).unwrap(), InsertOutcome::Inserted);
        assert_eq!(db.ledger_insert(&entry).unwrap(), InsertOutcome::AlreadyPresent);

        let listed = db.ledger_list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].version, entry.version);
        assert_eq!(listed[0].migration_name, "CreateUsers");
        assert_eq!(listed[0].start_time.timestamp(), start.timestamp());

        db.set_breakpoint(entry.version, true).unwrap();
        assert!(db.ledger_list().unwrap()[0].breakpoint);

        db.ledger_delete(entry.version).unwrap();
        assert!(db.ledger_list().unwrap().is_empty());
        assert!(matches!(
            db.set_breakpoint(entry.version, false),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn ledger_list_is_ascending() {
        let mut db = adapter();
        let now = Utc::now();
        for v in [10, 2, 7] {
            db.ledger_insert(&LedgerEntry::new(Version::new(v), format!("M{v}"), now, now))
                .unwrap();
        }
        let versions: Vec<u64> = db.ledger_list().unwrap().iter().map(|e| e.version.get()).collect();
        assert_eq!(versions, vec![2, 7, 10]);
    }

    #[test]
    fn sql_errors_surface_as_adapter_errors() {
        let mut db = adapter();
        let err = db
            .execute(&Operation::DropColumn {
                table: "users".into(),
                column: "x".into(),
                definition: None,
            })
            .unwrap_err();
        assert!(matches!(err, Error::Adapter(ref msg) if msg.contains("drop column x from users")));
    }

    #[test]
    fn ledger_table_name_is_validated() {
        assert!(matches!(
            SqliteAdapter::in_memory("ledger; DROP TABLE users"),
            Err(Error::Config(_))
        ));
        assert!(SqliteAdapter::in_memory("_ledger2").is_ok());
    }

    #[test]
    fn opens_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.sqlite3");
        {
            let mut db = SqliteAdapter::open(&path, "schema_ledger").unwrap();
            db.execute(&users()).unwrap();
        }
        let db = SqliteAdapter::open(&path, "schema_ledger").unwrap();
        assert!(db.table_exists("users").unwrap());
    }

    #[test]
    fn parses_sqlite_datetime_format() {
        let dt = parse_datetime("2024-03-01 10:20:30").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-01T10:20:30+00:00");
        assert!(parse_datetime("yesterday").is_err());
    }
}
