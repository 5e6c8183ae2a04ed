//! Sync tuning loaded from `~/.healthsync/config.yaml`.
//!
//! Every key is optional; a missing file means all defaults.
//!
//! ```yaml
//! grace_period_secs: 5
//! window_tolerance_secs: 2
//! sweep_interval_secs: 300
//! external_timeout_secs: 10
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::DEFAULT_WINDOW_TOLERANCE_SECS;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How long a freshly resynced record is exempt from reconciliation.
    pub grace_period_secs: u64,
    /// Symmetric tolerance around a record timestamp for external lookups.
    pub window_tolerance_secs: u32,
    /// Period of the background reconciliation sweep.
    pub sweep_interval_secs: u64,
    /// Per-call limit applied to external store operations.
    pub external_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 5,
            window_tolerance_secs: DEFAULT_WINDOW_TOLERANCE_SECS as u32,
            sweep_interval_secs: 300,
            external_timeout_secs: 10,
        }
    }
}

impl SyncConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn window_tolerance(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.window_tolerance_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        // A zero period would make the ticker spin.
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn external_timeout(&self) -> Duration {
        Duration::from_secs(self.external_timeout_secs.max(1))
    }
}

/// `<home>/.healthsync/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".healthsync").join("config.yaml")
}

/// Load the config under `home`, falling back to defaults if absent.
pub fn load_at(home: &Path) -> Result<SyncConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(SyncConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    if contents.trim().is_empty() {
        return Ok(SyncConfig::default());
    }
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<SyncConfig, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    load_at(&home)
}
