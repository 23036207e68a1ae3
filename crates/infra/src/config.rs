//! Runtime configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable holding the snapshot interval.
pub const SNAPSHOT_EVERY_ENV: &str = "WAREHOUSE_SNAPSHOT_EVERY";

const DEFAULT_SNAPSHOT_EVERY: u64 = 100;
const DEFAULT_APPEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a positive integer, got '{value}'")]
    InvalidValue { var: &'static str, value: String },

    #[error("snapshot_every must be greater than zero")]
    ZeroSnapshotInterval,

    #[error("append_timeout must be greater than zero")]
    ZeroAppendTimeout,
}

/// Options recognized by the entity runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of events between two snapshots of an entity.
    pub snapshot_every: u64,

    /// Upper bound on a single append to the event log.
    pub append_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            snapshot_every: DEFAULT_SNAPSHOT_EVERY,
            append_timeout: DEFAULT_APPEND_TIMEOUT,
        }
    }
}

impl RuntimeConfig {
    /// Load from the process environment. Only the snapshot interval is
    /// externally configurable; everything else keeps its default.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using an arbitrary variable lookup (tests, embedded hosts).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup(SNAPSHOT_EVERY_ENV) {
            config.snapshot_every =
                raw.trim()
                    .parse::<u64>()
                    .map_err(|_| ConfigError::InvalidValue {
                        var: SNAPSHOT_EVERY_ENV,
                        value: raw.clone(),
                    })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_snapshot_every(mut self, snapshot_every: u64) -> Self {
        self.snapshot_every = snapshot_every;
        self
    }

    pub fn with_append_timeout(mut self, append_timeout: Duration) -> Self {
        self.append_timeout = append_timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.snapshot_every == 0 {
            return Err(ConfigError::ZeroSnapshotInterval);
        }
        if self.append_timeout.is_zero() {
            return Err(ConfigError::ZeroAppendTimeout);
        }
        Ok(())
    }
}
