use std::path::{Path, PathBuf};

use stratum_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

pub const CONFIG_ENV_VAR: &str = "STRATUM_CONFIG";

pub struct ConfigLoader;

impl ConfigLoader {
    /// `~/.stratum`, or `.stratum` when no home directory is known.
    pub fn default_config_dir() -> PathBuf {
        dirs::home_dir()
            .map(|home| home.join(".stratum"))
            .unwrap_or_else(|| PathBuf::from(".stratum"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yml")
    }

    /// Picks the config file: an explicit path wins, then `STRATUM_CONFIG`,
    /// then the default location.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => Self::default_config_path(),
        }
    }

    /// Reads and parses the config file. A missing file is an error only
    /// when the path was given explicitly.
    pub fn load(explicit: Option<&Path>) -> Result<(AppConfig, PathBuf)> {
        let path = Self::resolve_path(explicit);
        if !path.exists() {
            if explicit.is_some() {
                return Err(Error::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            debug!("no config file at {}, using defaults", path.display());
            return Ok((AppConfig::default(), path));
        }
        let config = Self::load_from(&path)?;
        info!("loaded config from {}", path.display());
        Ok((config, path))
    }

    pub fn load_from(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            "yml" | "yaml" => serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("YAML parse error in {}: {e}", path.display()))),
            "toml" => toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("TOML parse error in {}: {e}", path.display()))),
            other => Err(Error::Config(format!(
                "unsupported config extension: {other}"
            ))),
        }
    }

    /// Directory relative paths in the config are resolved against.
    pub fn base_dir(config_path: &Path) -> PathBuf {
        match config_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}
