use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stratum_common::{Error, Result, VersionOrder};

pub const DEFAULT_LEDGER_TABLE: &str = "schema_ledger";
pub const DEFAULT_MIGRATIONS_DIR: &str = "db/migrations";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub default_environment: Option<String>,

    #[serde(default)]
    pub migrations: MigrationsConfig,

    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationsConfig {
    #[serde(default = "default_paths")]
    pub paths: Vec<PathBuf>,

    #[serde(default)]
    pub version_order: VersionOrder,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            paths: default_paths(),
            version_order: VersionOrder::default(),
        }
    }
}

fn default_paths() -> Vec<PathBuf> {
    vec![PathBuf::from(DEFAULT_MIGRATIONS_DIR)]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Path of the SQLite database file.
    pub database: PathBuf,

    #[serde(default = "default_ledger_table")]
    pub ledger_table: String,

    /// Overrides `migrations.version_order` for this environment.
    #[serde(default)]
    pub version_order: Option<VersionOrder>,
}

fn default_ledger_table() -> String {
    DEFAULT_LEDGER_TABLE.to_string()
}

/// Everything a command needs to run against one environment, with paths
/// resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEnvironment {
    pub name: String,
    pub database: PathBuf,
    pub ledger_table: String,
    pub migration_paths: Vec<PathBuf>,
    pub version_order: VersionOrder,
}

impl AppConfig {
    /// Resolves `name` (or `default_environment`) against this config.
    /// Relative paths are taken relative to `base_dir`, normally the
    /// directory holding the config file.
    pub fn environment(&self, name: Option<&str>, base_dir: &Path) -> Result<ResolvedEnvironment> {
        let name = match name.or(self.default_environment.as_deref()) {
            Some(name) => name,
            None if self.environments.len() == 1 => self
                .environments
                .keys()
                .next()
                .map(String::as_str)
                .unwrap_or_default(),
            None => {
                return Err(Error::Config(
                    "no environment given and no default_environment configured".into(),
                ));
            }
        };

        let env = self.environments.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.environments.keys().map(String::as_str).collect();
            Error::Config(format!(
                "unknown environment {name:?} (configured: {})",
                known.join(", ")
            ))
        })?;

        Ok(ResolvedEnvironment {
            name: name.to_string(),
            database: resolve(base_dir, &env.database),
            ledger_table: env.ledger_table.clone(),
            migration_paths: self
                .migrations
                .paths
                .iter()
                .map(|p| resolve(base_dir, p))
                .collect(),
            version_order: env.version_order.unwrap_or(self.migrations.version_order),
        })
    }
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}
