pub mod adapter;
pub mod inversion;
pub mod ledger;
pub mod loader;
pub mod manager;
pub mod memory;
pub mod migration;
pub mod operation;
pub mod recorder;

pub use adapter::Adapter;
pub use inversion::invert;
pub use ledger::{InsertOutcome, LedgerEntry};
pub use loader::{MigrationLoader, TemplateFormat};
pub use manager::{
    BatchReport, CancellationFlag, ManagerConfig, MigrationManager, MigrationOutcome,
    MigrationResult, MigrationStatus, RollbackTarget, StatusEntry, StatusReport,
};
pub use memory::MemoryAdapter;
pub use migration::{
    Migration, MigrationDefinition, MigrationDirection, MigrationMode, MigrationSet,
    MigrationState,
};
pub use operation::{
    ColumnDefinition, ForeignKeyDefinition, IndexDefinition, Operation, OperationKind,
    TableDefinition,
};
pub use recorder::{Direction, Recorder};
pub use stratum_common::{Error, Result, Version, VersionOrder};
