use stratum_common::{Result, Version};

use crate::ledger::{InsertOutcome, LedgerEntry};
use crate::operation::Operation;

/// Database access as seen by the migration manager.
///
/// Implementations own SQL rendering, identifier quoting, connection
/// handling and any locking that keeps two runners from applying the same
/// version. Every method reports database rejections as `Error::Adapter`.
pub trait Adapter {
    fn begin_transaction(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    fn execute(&mut self, operation: &Operation) -> Result<()>;

    fn ledger_has_version(&mut self, version: Version) -> Result<bool>;

    /// Records an applied version. Returns `AlreadyPresent` instead of an
    /// error when the version is in the ledger already.
    fn ledger_insert(&mut self, entry: &LedgerEntry) -> Result<InsertOutcome>;

    fn ledger_delete(&mut self, version: Version) -> Result<()>;

    /// All ledger entries, ascending by version.
    fn ledger_list(&mut self) -> Result<Vec<LedgerEntry>>;

    fn set_breakpoint(&mut self, version: Version, breakpoint: bool) -> Result<()>;
}

impl<A: Adapter + ?Sized> Adapter for Box<A> {
    fn begin_transaction(&mut self) -> Result<()> {
        (**self).begin_transaction()
    }

    fn commit(&mut self) -> Result<()> {
        (**self).commit()
    }

    fn rollback(&mut self) -> Result<()> {
        (**self).rollback()
    }

    fn execute(&mut self, operation: &Operation) -> Result<()> {
        (**self).execute(operation)
    }

    fn ledger_has_version(&mut self, version: Version) -> Result<bool> {
        (**self).ledger_has_version(version)
    }

    fn ledger_insert(&mut self, entry: &LedgerEntry) -> Result<InsertOutcome> {
        (**self).ledger_insert(entry)
    }

    fn ledger_delete(&mut self, version: Version) -> Result<()> {
        (**self).ledger_delete(version)
    }

    fn ledger_list(&mut self) -> Result<Vec<LedgerEntry>> {
        (**self).ledger_list()
    }

    fn set_breakpoint(&mut self, version: Version, breakpoint: bool) -> Result<()> {
        (**self).set_breakpoint(version, breakpoint)
    }
}
