mod schema;

pub use schema::*;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::paths::Paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Resolved XDG-compliant paths (not serialized)
    #[serde(skip)]
    pub paths: Paths,

    /// Config file this was loaded from, if any (not serialized)
    #[serde(skip)]
    pub source: Option<PathBuf>,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration that is present but unusable.
///
/// Kept distinct from I/O failures elsewhere so the CLI can report it with
/// its own exit code.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid {key}: {message}")]
    Invalid { key: String, message: String },
}

impl Config {
    /// Load from the default location, or from `override_path` when given.
    ///
    /// A missing config file yields the defaults.
    pub fn load_with_override(override_path: Option<&str>) -> Result<Self> {
        let paths = Paths::resolve()?;
        let path = match override_path {
            Some(p) => PathBuf::from(shellexpand::tilde(p).to_string()),
            None => paths.config_file(),
        };
        Self::load_from(&path, paths)
    }

    pub fn load() -> Result<Self> {
        Self::load_with_override(None)
    }

    pub fn load_from(path: &Path, paths: Paths) -> Result<Self> {
        if !path.exists() {
            return Ok(Config {
                paths,
                ..Config::default()
            });
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.paths = paths;
        config.source = Some(path.to_path_buf());

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = self
            .source
            .clone()
            .unwrap_or_else(|| self.paths.config_file());

        // Create parent directories
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let paths = Paths::resolve()?;
        Ok(paths.config_file())
    }

    /// Absolute sockets directory: `lock.sockets_path` if set, else the default.
    pub fn sockets_dir(&self) -> Result<PathBuf> {
        match self.lock.sockets_path.as_deref() {
            Some(raw) if !raw.trim().is_empty() => resolve_dir(raw),
            _ => Ok(self.paths.sockets_dir()),
        }
    }

    /// `lock.wait_timeout` as a duration; zero means no limit.
    pub fn wait_timeout(&self) -> Result<Duration> {
        parse_duration(&self.lock.wait_timeout).map_err(|e| {
            ConfigError::Invalid {
                key: "lock.wait_timeout".to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["lock", "scope"] => Ok(self.lock.scope.clone()),
            ["lock", "sockets_path"] => Ok(self.lock.sockets_path.clone().unwrap_or_default()),
            ["lock", "wait_timeout"] => Ok(self.lock.wait_timeout.clone()),
            ["logging", "level"] => Ok(self.logging.level.clone()),
            ["logging", "retention_days"] => Ok(self.logging.retention_days.to_string()),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["lock", "scope"] => self.lock.scope = value.to_string(),
            ["lock", "sockets_path"] => {
                self.lock.sockets_path = Some(value.to_string()).filter(|v| !v.is_empty())
            }
            ["lock", "wait_timeout"] => {
                parse_duration(value)?;
                self.lock.wait_timeout = value.to_string();
            }
            ["logging", "level"] => self.logging.level = value.to_string(),
            ["logging", "retention_days"] => self.logging.retention_days = value.parse()?,
            _ => anyhow::bail!("Unknown config key: {}", key),
        }

        Ok(())
    }
}

/// Expand `~` and `$VAR` in a directory setting and make it absolute.
pub fn resolve_dir(raw: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(raw.trim()).map_err(|e| ConfigError::Invalid {
        key: "sockets path".to_string(),
        message: e.to_string(),
    })?;
    let path = std::path::absolute(expanded.as_ref())?;
    Ok(path)
}

/// Default config template with helpful comments (used by `config init`)
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# hostlock configuration

[lock]
# Only machine-wide locks are supported.
scope = "machine"

# Directory containing the leader socket (agent-leader.sock).
# Default: $XDG_RUNTIME_DIR/hostlock/sockets
# sockets_path = "/var/run/hostlock/sockets"

# How long `lock acquire` waits before giving up, e.g. "30s" or "1m30s".
# "0s" waits forever.
wait_timeout = "0s"

[logging]
level = "info"

# Days of background leader logs to keep (0 = keep forever)
retention_days = 7
"#;
