//! Engine configuration.
//!
//! The three system warehouses are required and explicit: nothing is looked
//! up by scanning the directory.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use lotflow_core::WarehouseId;

pub const ENV_CENTRAL_WAREHOUSE: &str = "LOTFLOW_CENTRAL_WAREHOUSE";
pub const ENV_INCIDENTS_WAREHOUSE: &str = "LOTFLOW_INCIDENTS_WAREHOUSE";
pub const ENV_EMBARK_BUFFER_WAREHOUSE: &str = "LOTFLOW_EMBARK_BUFFER_WAREHOUSE";
pub const ENV_LOCK_TIMEOUT_MS: &str = "LOTFLOW_LOCK_TIMEOUT_MS";

pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing configuration value {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Distribution center that rejected transfers escalate to.
    pub central_warehouse: WarehouseId,
    /// Holds compensating lots filed by incidents.
    pub incidents_warehouse: WarehouseId,
    /// Where shipments park stock until delivery.
    pub embark_buffer_warehouse: WarehouseId,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl EngineConfig {
    pub fn new(
        central_warehouse: WarehouseId,
        incidents_warehouse: WarehouseId,
        embark_buffer_warehouse: WarehouseId,
    ) -> Self {
        Self {
            central_warehouse,
            incidents_warehouse,
            embark_buffer_warehouse,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Load from `LOTFLOW_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key/value source (environment, test maps).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let warehouse = |key: &'static str| -> Result<WarehouseId, ConfigError> {
            let raw = lookup(key).ok_or(ConfigError::Missing(key))?;
            raw.trim().parse().map_err(|err| ConfigError::Invalid {
                key,
                message: format!("{err}"),
            })
        };

        let lock_timeout_ms = match lookup(ENV_LOCK_TIMEOUT_MS) {
            Some(raw) => raw.trim().parse().map_err(|err| ConfigError::Invalid {
                key: ENV_LOCK_TIMEOUT_MS,
                message: format!("{err}"),
            })?,
            None => DEFAULT_LOCK_TIMEOUT_MS,
        };

        let config = Self {
            central_warehouse: warehouse(ENV_CENTRAL_WAREHOUSE)?,
            incidents_warehouse: warehouse(ENV_INCIDENTS_WAREHOUSE)?,
            embark_buffer_warehouse: warehouse(ENV_EMBARK_BUFFER_WAREHOUSE)?,
            lock_timeout_ms,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file with the same field names as this struct.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.central_warehouse == self.incidents_warehouse
            || self.central_warehouse == self.embark_buffer_warehouse
            || self.incidents_warehouse == self.embark_buffer_warehouse
        {
            return Err(ConfigError::Invalid {
                key: "warehouses",
                message: "central, incidents and embark buffer warehouses must all differ"
                    .to_string(),
            });
        }
        if self.lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: ENV_LOCK_TIMEOUT_MS,
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
