use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use stratum_common::{Error, Result, Version};

use crate::operation::Operation;
use crate::recorder::{Direction, Recorder};

/// A migration body: issues schema operations into a recorder.
pub type SchemaFn = Arc<dyn Fn(&mut Recorder) + Send + Sync>;

/// Decides at run time whether a migration body should execute.
pub type Predicate = Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationMode {
    Change,
    UpDown,
}

impl fmt::Display for MigrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationMode::Change => write!(f, "change"),
            MigrationMode::UpDown => write!(f, "up/down"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationDirection {
    Up,
    Down,
}

#[derive(Clone)]
enum Body {
    Change(SchemaFn),
    UpDown { up: SchemaFn, down: SchemaFn },
}

/// A single versioned unit of schema change. Immutable once built.
#[derive(Clone)]
pub struct Migration {
    version: Version,
    name: String,
    body: Body,
    should_execute: Option<Predicate>,
}

impl Migration {
    /// A reversible migration: `change` describes the forward direction and
    /// rollback runs its derived inverse.
    pub fn change<F>(version: impl Into<Version>, name: impl Into<String>, change: F) -> Self
    where
        F: Fn(&mut Recorder) + Send + Sync + 'static,
    {
        Self {
            version: version.into(),
            name: name.into(),
            body: Body::Change(Arc::new(change)),
            should_execute: None,
        }
    }

    /// A migration with an explicit rollback. `down` is trusted as written.
    pub fn up_down<U, D>(version: impl Into<Version>, name: impl Into<String>, up: U, down: D) -> Self
    where
        U: Fn(&mut Recorder) + Send + Sync + 'static,
        D: Fn(&mut Recorder) + Send + Sync + 'static,
    {
        Self {
            version: version.into(),
            name: name.into(),
            body: Body::UpDown {
                up: Arc::new(up),
                down: Arc::new(down),
            },
            should_execute: None,
        }
    }

    pub fn with_should_execute<P>(mut self, predicate: P) -> Self
    where
        P: Fn() -> bool + Send + Sync + 'static,
    {
        self.should_execute = Some(Arc::new(predicate));
        self
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> MigrationMode {
        match self.body {
            Body::Change(_) => MigrationMode::Change,
            Body::UpDown { .. } => MigrationMode::UpDown,
        }
    }

    pub fn should_execute(&self) -> bool {
        self.should_execute.as_ref().is_none_or(|p| p())
    }

    /// Runs the author's body against a fresh recorder and returns the
    /// operations to execute for `direction`. Change-style rollbacks go
    /// through the inversion engine here, before any database work.
    pub fn plan(&self, direction: MigrationDirection) -> Result<Vec<Operation>> {
        let (body, flush_direction) = match (&self.body, direction) {
            (Body::Change(change), MigrationDirection::Up) => (change, Direction::Forward),
            (Body::Change(change), MigrationDirection::Down) => (change, Direction::Reverse),
            (Body::UpDown { up, .. }, MigrationDirection::Up) => (up, Direction::Forward),
            (Body::UpDown { down, .. }, MigrationDirection::Down) => (down, Direction::Forward),
        };
        let mut recorder = Recorder::new();
        body(&mut recorder);
        recorder.plan(flush_direction)
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("mode", &self.mode())
            .field("conditional", &self.should_execute.is_some())
            .finish()
    }
}

/// The loader-facing shape of a migration: every part optional, validated
/// into a [`Migration`] by `TryFrom`.
#[derive(Clone, Default)]
pub struct MigrationDefinition {
    pub version: Version,
    pub name: String,
    pub change: Option<SchemaFn>,
    pub up: Option<SchemaFn>,
    pub down: Option<SchemaFn>,
    pub should_execute: Option<Predicate>,
}

impl TryFrom<MigrationDefinition> for Migration {
    type Error = Error;

    fn try_from(def: MigrationDefinition) -> Result<Self> {
        let label = format!("migration {} ({})", def.version, def.name);
        if def.name.trim().is_empty() {
            return Err(Error::Config(format!(
                "migration {} has an empty name",
                def.version
            )));
        }

        let body = match (def.change, def.up, def.down) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                return Err(Error::Config(format!(
                    "{label} declares both change and up/down; pick one"
                )));
            }
            (Some(change), None, None) => Body::Change(change),
            (None, Some(up), Some(down)) => Body::UpDown { up, down },
            (None, Some(_), None) => {
                return Err(Error::Config(format!("{label} declares up without down")));
            }
            (None, None, Some(_)) => {
                return Err(Error::Config(format!("{label} declares down without up")));
            }
            (None, None, None) => {
                return Err(Error::Config(format!(
                    "{label} declares neither change nor up/down"
                )));
            }
        };

        Ok(Migration {
            version: def.version,
            name: def.name,
            body,
            should_execute: def.should_execute,
        })
    }
}

/// Discovered migrations, ascending by version, versions unique.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    migrations: BTreeMap<Version, Migration>,
}

impl MigrationSet {
    /// Fails on the first version that appears twice.
    pub fn new(migrations: impl IntoIterator<Item = Migration>) -> Result<Self> {
        let mut by_version = BTreeMap::new();
        for migration in migrations {
            let version = migration.version();
            if let Some(existing) = by_version.insert(version, migration) {
                let duplicate = &by_version[&version];
                return Err(Error::Config(format!(
                    "duplicate migration version {version}: {} and {}",
                    existing.name(),
                    duplicate.name()
                )));
            }
        }
        Ok(Self {
            migrations: by_version,
        })
    }

    pub fn get(&self, version: Version) -> Option<&Migration> {
        self.migrations.get(&version)
    }

    pub fn contains(&self, version: Version) -> bool {
        self.migrations.contains_key(&version)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.values()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn latest_version(&self) -> Option<Version> {
        self.migrations.keys().next_back().copied()
    }
}

/// Lifecycle of one migration within one manager run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Pending,
    Running,
    Applied,
    Skipped,
    Failed,
    RollingBack,
    Reverted,
}

impl MigrationState {
    pub fn can_transition_to(self, next: MigrationState) -> bool {
        use MigrationState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Applied)
                | (Running, Skipped)
                | (Running, Failed)
                | (Applied, RollingBack)
                | (RollingBack, Reverted)
                | (RollingBack, Failed)
        )
    }

    pub fn transition(self, next: MigrationState) -> Result<MigrationState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::Other(format!(
                "illegal migration state transition {self:?} -> {next:?}"
            )))
        }
    }
}
