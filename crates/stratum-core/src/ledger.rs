use std::cmp::Reverse;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratum_common::{Version, VersionOrder};

/// A persisted ledger row. Presence means "applied and not rolled back".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub version: Version,
    pub migration_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub breakpoint: bool,
}

impl LedgerEntry {
    pub fn new(
        version: Version,
        migration_name: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            version,
            migration_name: migration_name.into(),
            start_time,
            end_time,
            breakpoint: false,
        }
    }

    /// Entry for a migration whose `should_execute` predicate returned
    /// false: zero duration.
    pub fn skipped(version: Version, migration_name: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::new(version, migration_name, at, at)
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end_time - self.start_time
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyPresent,
}

/// Sorts entries so the first one is the next to roll back.
pub fn sort_newest_first(entries: &mut [LedgerEntry], order: VersionOrder) {
    match order {
        VersionOrder::Creation => entries.sort_by_key(|e| Reverse(e.version)),
        VersionOrder::Execution => {
            entries.sort_by_key(|e| (Reverse(e.start_time), Reverse(e.version)))
        }
    }
}
