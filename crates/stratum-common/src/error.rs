use thiserror::Error;

use crate::types::Version;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Duplicate versions, malformed migration units, ambiguous modes and
    /// unreadable config files. Raised before any database contact.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("adapter error: {0}")]
    Adapter(String),

    #[error(
        "irreversible operation at position {position}: {operation} (no database work was attempted)"
    )]
    IrreversibleOperation { position: usize, operation: String },

    #[error("rollback blocked by breakpoint on version {0}")]
    BreakpointBlocked(Version),

    #[error("migration {version} ({name}) failed: {source}")]
    MigrationFailed {
        version: Version,
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True when the failure happened while planning, before any statement
    /// reached the database.
    pub fn is_planning_failure(&self) -> bool {
        match self {
            Error::IrreversibleOperation { .. } | Error::BreakpointBlocked(_) => true,
            Error::MigrationFailed { source, .. } => source.is_planning_failure(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Error;
    use crate::types::Version;

    #[test]
    fn error_display_includes_context() {
        let e = Error::Config("duplicate version 1".into());
        assert_eq!(e.to_string(), "configuration error: duplicate version 1");

        let e = Error::Adapter("no such table: t1".into());
        assert_eq!(e.to_string(), "adapter error: no such table: t1");

        let e = Error::Other("misc".into());
        assert_eq!(e.to_string(), "misc");
    }

    #[test]
    fn irreversible_message_says_nothing_ran() {
        let e = Error::IrreversibleOperation {
            position: 2,
            operation: "drop column x from t1".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("position 2"));
        assert!(msg.contains("drop column x from t1"));
        assert!(msg.contains("no database work was attempted"));
        assert!(e.is_planning_failure());
    }

    #[test]
    fn migration_failed_wraps_cause() {
        let e = Error::MigrationFailed {
            version: Version::new(20240101000000),
            name: "CreateUsers".into(),
            source: Box::new(Error::Adapter("table users already exists".into())),
        };
        assert_eq!(
            e.to_string(),
            "migration 20240101000000 (CreateUsers) failed: adapter error: table users already exists"
        );
        assert!(!e.is_planning_failure());
    }
}
