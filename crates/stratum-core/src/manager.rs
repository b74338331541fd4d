//! Orchestrates migrate, rollback, redo, status and breakpoint actions.
//!
//! Every migration runs in its own adapter transaction together with its
//! ledger write. A batch stops at the first failure; migrations committed
//! before it stay committed.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use stratum_common::{Error, Result, Version, VersionOrder};
use tracing::{debug, info, warn};

use crate::adapter::Adapter;
use crate::ledger::{InsertOutcome, LedgerEntry, sort_newest_first};
use crate::migration::{Migration, MigrationDirection, MigrationSet, MigrationState};
use crate::operation::Operation;
use crate::recorder::replay;

/// Settings passed to the manager at construction.
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    pub version_order: VersionOrder,
    /// Environment label, used in log output only.
    pub environment: Option<String>,
}

/// Shared flag a caller sets to stop a batch. Checked between migrations,
/// never inside a transaction.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackTarget {
    /// Revert every applied version strictly greater than this one.
    /// `Version::ZERO` reverts everything.
    Version(Version),
    /// Revert the most recent N versions.
    Steps(usize),
}

#[derive(Debug)]
pub enum MigrationOutcome {
    Applied { duration: Duration },
    /// `should_execute` returned false. Recorded in the ledger anyway.
    Skipped,
    /// Another runner committed this version first.
    AlreadyApplied,
    Reverted { duration: Duration },
    /// Rollback refused because the version carries a breakpoint.
    Blocked,
    Failed(Error),
}

impl MigrationOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, MigrationOutcome::Failed(_))
    }

    fn halts_batch(&self) -> bool {
        matches!(self, MigrationOutcome::Failed(_) | MigrationOutcome::Blocked)
    }
}

#[derive(Debug)]
pub struct MigrationResult {
    pub version: Version,
    pub name: String,
    pub outcome: MigrationOutcome,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: Vec<MigrationResult>,
    /// The caller cancelled the batch before every migration ran.
    pub cancelled: bool,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failure().is_none()
    }

    pub fn failure(&self) -> Option<&MigrationResult> {
        self.results.iter().find(|r| r.outcome.is_failed())
    }

    pub fn blocked(&self) -> Option<&MigrationResult> {
        self.results
            .iter()
            .find(|r| matches!(r.outcome, MigrationOutcome::Blocked))
    }

    pub fn applied_versions(&self) -> Vec<Version> {
        self.versions_where(|o| {
            matches!(
                o,
                MigrationOutcome::Applied { .. } | MigrationOutcome::Skipped
            )
        })
    }

    pub fn reverted_versions(&self) -> Vec<Version> {
        self.versions_where(|o| matches!(o, MigrationOutcome::Reverted { .. }))
    }

    fn versions_where(&self, pred: impl Fn(&MigrationOutcome) -> bool) -> Vec<Version> {
        self.results
            .iter()
            .filter(|r| pred(&r.outcome))
            .map(|r| r.version)
            .collect()
    }

    /// Converts a failed batch into `Error::MigrationFailed`.
    pub fn into_result(self) -> Result<Self> {
        let BatchReport { results, cancelled } = self;
        let mut kept = Vec::with_capacity(results.len());
        for result in results {
            match result.outcome {
                MigrationOutcome::Failed(source) => {
                    return Err(Error::MigrationFailed {
                        version: result.version,
                        name: result.name,
                        source: Box::new(source),
                    });
                }
                outcome => kept.push(MigrationResult {
                    version: result.version,
                    name: result.name,
                    outcome,
                }),
            }
        }
        Ok(BatchReport {
            results: kept,
            cancelled,
        })
    }

    fn push(&mut self, version: Version, name: &str, outcome: MigrationOutcome) -> bool {
        let halt = outcome.halts_batch();
        self.results.push(MigrationResult {
            version,
            name: name.to_string(),
            outcome,
        });
        halt
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationStatus {
    Applied {
        applied_at: DateTime<Utc>,
        breakpoint: bool,
    },
    Pending,
    /// In the ledger but not among the discovered migrations.
    Missing {
        applied_at: DateTime<Utc>,
        breakpoint: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub version: Version,
    pub name: String,
    #[serde(flatten)]
    pub status: MigrationStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    pub entries: Vec<StatusEntry>,
}

impl StatusReport {
    pub fn get(&self, version: Version) -> Option<&StatusEntry> {
        self.entries.iter().find(|e| e.version == version)
    }

    pub fn missing(&self) -> impl Iterator<Item = &StatusEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.status, MigrationStatus::Missing { .. }))
    }

    pub fn pending(&self) -> impl Iterator<Item = &StatusEntry> {
        self.entries
            .iter()
            .filter(|e| e.status == MigrationStatus::Pending)
    }

    pub fn has_missing(&self) -> bool {
        self.missing().next().is_some()
    }
}

pub struct MigrationManager<A: Adapter> {
    adapter: A,
    migrations: MigrationSet,
    config: ManagerConfig,
    cancel: CancellationFlag,
}

impl<A: Adapter> MigrationManager<A> {
    pub fn new(adapter: A, migrations: MigrationSet, config: ManagerConfig) -> Self {
        Self {
            adapter,
            migrations,
            config,
            cancel: CancellationFlag::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn migrations(&self) -> &MigrationSet {
        &self.migrations
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    pub fn into_adapter(self) -> A {
        self.adapter
    }

    /// Applies every pending migration with `version <= target` (all of
    /// them when `target` is `None`), ascending.
    pub fn migrate(&mut self, target: Option<Version>) -> Result<BatchReport> {
        let applied: HashSet<Version> = self
            .adapter
            .ledger_list()?
            .into_iter()
            .map(|e| e.version)
            .collect();

        let work: Vec<Migration> = self
            .migrations
            .iter()
            .filter(|m| target.is_none_or(|t| m.version() <= t))
            .filter(|m| !applied.contains(&m.version()))
            .cloned()
            .collect();

        info!(
            "{} pending migration(s){}",
            work.len(),
            self.environment_suffix()
        );
        Ok(self.apply_batch(work))
    }

    /// Reverts applied migrations, newest first in the configured ledger
    /// order. Stops at the first failure or breakpoint.
    pub fn rollback(&mut self, target: RollbackTarget) -> Result<BatchReport> {
        let mut entries = self.adapter.ledger_list()?;
        sort_newest_first(&mut entries, self.config.version_order);

        let work: Vec<LedgerEntry> = match target {
            RollbackTarget::Version(v) => entries.into_iter().filter(|e| e.version > v).collect(),
            RollbackTarget::Steps(n) => entries.into_iter().take(n).collect(),
        };

        info!(
            "{} migration(s) to roll back{}",
            work.len(),
            self.environment_suffix()
        );

        let mut report = BatchReport::default();
        for entry in work {
            if self.cancel.is_cancelled() {
                warn!("rollback cancelled before version {}", entry.version);
                report.cancelled = true;
                break;
            }
            let (name, outcome) = self.revert_entry(&entry);
            if report.push(entry.version, &name, outcome) {
                break;
            }
        }
        Ok(report)
    }

    /// Rolls back the most recent migration and applies it again.
    pub fn redo(&mut self) -> Result<BatchReport> {
        let mut report = self.rollback(RollbackTarget::Steps(1))?;
        if !report.is_success() || report.cancelled {
            return Ok(report);
        }
        let Some(version) = report.reverted_versions().first().copied() else {
            return Ok(report);
        };
        let Some(migration) = self.migrations.get(version).cloned() else {
            return Ok(report);
        };
        let again = self.apply_batch(vec![migration]);
        report.results.extend(again.results);
        report.cancelled = again.cancelled;
        Ok(report)
    }

    /// Ledger state of every discovered migration, plus ledger entries with
    /// no discovered counterpart. Missing entries are reported, never fixed.
    pub fn status(&mut self) -> Result<StatusReport> {
        let ledger: BTreeMap<Version, LedgerEntry> = self
            .adapter
            .ledger_list()?
            .into_iter()
            .map(|e| (e.version, e))
            .collect();

        let mut entries: Vec<StatusEntry> = self
            .migrations
            .iter()
            .map(|m| StatusEntry {
                version: m.version(),
                name: m.name().to_string(),
                status: match ledger.get(&m.version()) {
                    Some(e) => MigrationStatus::Applied {
                        applied_at: e.end_time,
                        breakpoint: e.breakpoint,
                    },
                    None => MigrationStatus::Pending,
                },
            })
            .collect();

        for entry in ledger.values() {
            if self.migrations.contains(entry.version) {
                continue;
            }
            warn!(
                "ledger entry {} ({}) has no matching migration",
                entry.version, entry.migration_name
            );
            entries.push(StatusEntry {
                version: entry.version,
                name: entry.migration_name.clone(),
                status: MigrationStatus::Missing {
                    applied_at: entry.end_time,
                    breakpoint: entry.breakpoint,
                },
            });
        }
        entries.sort_by_key(|e| e.version);

        Ok(StatusReport { entries })
    }

    pub fn set_breakpoint(&mut self, version: Version, breakpoint: bool) -> Result<()> {
        if !self.adapter.ledger_has_version(version)? {
            return Err(Error::NotFound(format!(
                "version {version} is not applied; breakpoints can only be set on applied versions"
            )));
        }
        self.adapter.set_breakpoint(version, breakpoint)?;
        info!("breakpoint on {version} set to {breakpoint}");
        Ok(())
    }

    /// Flips the breakpoint on `version` and returns the new value.
    pub fn toggle_breakpoint(&mut self, version: Version) -> Result<bool> {
        let entry = self
            .adapter
            .ledger_list()?
            .into_iter()
            .find(|e| e.version == version)
            .ok_or_else(|| Error::NotFound(format!("version {version} is not applied")))?;
        let next = !entry.breakpoint;
        self.adapter.set_breakpoint(version, next)?;
        info!("breakpoint on {version} set to {next}");
        Ok(next)
    }

    /// Removes every breakpoint. Returns how many were cleared.
    pub fn clear_breakpoints(&mut self) -> Result<usize> {
        let marked: Vec<Version> = self
            .adapter
            .ledger_list()?
            .into_iter()
            .filter(|e| e.breakpoint)
            .map(|e| e.version)
            .collect();
        for version in &marked {
            self.adapter.set_breakpoint(*version, false)?;
        }
        info!("cleared {} breakpoint(s)", marked.len());
        Ok(marked.len())
    }

    fn environment_suffix(&self) -> String {
        match &self.config.environment {
            Some(env) => format!(" in {env}"),
            None => String::new(),
        }
    }

    fn apply_batch(&mut self, work: Vec<Migration>) -> BatchReport {
        let mut report = BatchReport::default();
        for migration in work {
            if self.cancel.is_cancelled() {
                warn!("migrate cancelled before version {}", migration.version());
                report.cancelled = true;
                break;
            }
            let outcome = self.apply_migration(&migration);
            if report.push(migration.version(), migration.name(), outcome) {
                break;
            }
        }
        report
    }

    fn apply_migration(&mut self, migration: &Migration) -> MigrationOutcome {
        let version = migration.version();
        let mut state = advance(version, MigrationState::Pending, MigrationState::Running);

        let plan = match migration.plan(MigrationDirection::Up) {
            Ok(plan) => plan,
            Err(e) => {
                advance(version, state, MigrationState::Failed);
                return MigrationOutcome::Failed(e);
            }
        };

        if let Err(e) = self.adapter.begin_transaction() {
            advance(version, state, MigrationState::Failed);
            return MigrationOutcome::Failed(e);
        }

        let started_at = Utc::now();
        let timer = Instant::now();
        let attempt = self.run_up(migration, &plan, started_at);

        let outcome = match attempt {
            Ok(MigrationOutcome::AlreadyApplied) => match self.adapter.rollback() {
                Ok(()) => {
                    info!("{version} {} was applied by another runner", migration.name());
                    MigrationOutcome::AlreadyApplied
                }
                Err(e) => MigrationOutcome::Failed(e),
            },
            Ok(outcome) => match self.adapter.commit() {
                Ok(()) => outcome,
                Err(e) => self.abort(e),
            },
            Err(e) => self.abort(e),
        };

        state = match &outcome {
            MigrationOutcome::Failed(e) => {
                warn!("{version} {} failed: {e}", migration.name());
                MigrationState::Failed
            }
            MigrationOutcome::Skipped => {
                info!("{version} {} skipped", migration.name());
                MigrationState::Skipped
            }
            _ => MigrationState::Applied,
        };
        advance(version, MigrationState::Running, state);

        match outcome {
            MigrationOutcome::Applied { .. } => {
                let duration = timer.elapsed();
                info!(
                    "{version} {} applied in {:.3}s",
                    migration.name(),
                    duration.as_secs_f64()
                );
                MigrationOutcome::Applied { duration }
            }
            other => other,
        }
    }

    fn run_up(
        &mut self,
        migration: &Migration,
        plan: &[Operation],
        started_at: DateTime<Utc>,
    ) -> Result<MigrationOutcome> {
        let version = migration.version();
        if self.adapter.ledger_has_version(version)? {
            return Ok(MigrationOutcome::AlreadyApplied);
        }

        let (entry, outcome) = if migration.should_execute() {
            replay(&mut self.adapter, plan)?;
            let entry = LedgerEntry::new(version, migration.name(), started_at, Utc::now());
            (
                entry,
                MigrationOutcome::Applied {
                    duration: Duration::ZERO,
                },
            )
        } else {
            (
                LedgerEntry::skipped(version, migration.name(), started_at),
                MigrationOutcome::Skipped,
            )
        };

        match self.adapter.ledger_insert(&entry)? {
            InsertOutcome::Inserted => Ok(outcome),
            InsertOutcome::AlreadyPresent => Ok(MigrationOutcome::AlreadyApplied),
        }
    }

    fn revert_entry(&mut self, entry: &LedgerEntry) -> (String, MigrationOutcome) {
        let version = entry.version;

        if entry.breakpoint {
            warn!(
                "{version} {} has a breakpoint; rollback stops here",
                entry.migration_name
            );
            return (entry.migration_name.clone(), MigrationOutcome::Blocked);
        }

        let Some(migration) = self.migrations.get(version).cloned() else {
            let err = Error::NotFound(format!(
                "version {version} ({}) is in the ledger but no migration was discovered for it",
                entry.migration_name
            ));
            return (entry.migration_name.clone(), MigrationOutcome::Failed(err));
        };

        let state = advance(version, MigrationState::Applied, MigrationState::RollingBack);
        let outcome = self.revert_migration(&migration);
        let next = if outcome.is_failed() {
            MigrationState::Failed
        } else {
            MigrationState::Reverted
        };
        advance(version, state, next);
        (migration.name().to_string(), outcome)
    }

    fn revert_migration(&mut self, migration: &Migration) -> MigrationOutcome {
        let version = migration.version();
        let execute_body = migration.should_execute();

        // Plan before opening a transaction: an irreversible change must not
        // reach the adapter at all.
        let plan = if execute_body {
            match migration.plan(MigrationDirection::Down) {
                Ok(plan) => plan,
                Err(e) => {
                    warn!("{version} {} cannot be rolled back: {e}", migration.name());
                    return MigrationOutcome::Failed(e);
                }
            }
        } else {
            Vec::new()
        };

        if let Err(e) = self.adapter.begin_transaction() {
            return MigrationOutcome::Failed(e);
        }

        let timer = Instant::now();
        let attempt = replay(&mut self.adapter, &plan)
            .and_then(|_| self.adapter.ledger_delete(version))
            .and_then(|_| self.adapter.commit());

        match attempt {
            Ok(()) => {
                let duration = timer.elapsed();
                info!(
                    "{version} {} reverted in {:.3}s",
                    migration.name(),
                    duration.as_secs_f64()
                );
                MigrationOutcome::Reverted { duration }
            }
            Err(e) => {
                warn!("{version} {} rollback failed: {e}", migration.name());
                self.abort(e)
            }
        }
    }

    /// Rolls back the open transaction after `cause`. The original error is
    /// what gets reported; a failing rollback is only logged.
    fn abort(&mut self, cause: Error) -> MigrationOutcome {
        if let Err(e) = self.adapter.rollback() {
            warn!("transaction rollback failed after error ({cause}): {e}");
        }
        MigrationOutcome::Failed(cause)
    }
}

fn advance(version: Version, from: MigrationState, to: MigrationState) -> MigrationState {
    match from.transition(to) {
        Ok(next) => {
            debug!("{version}: {from:?} -> {next:?}");
            next
        }
        Err(e) => {
            warn!("{version}: {e}");
            to
        }
    }
}
