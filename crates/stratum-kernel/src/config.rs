//! Runner configuration.
//!
//! Five tunables; everything else is fixed behavior. Values come from
//! defaults, an optional config file (format detected from the
//! extension) and `STRATUM_*` environment overrides, in that order.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration loading error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config parsing error: {0}")]
    Parse(String),
}

/// Tunable execution options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Extra attempts granted to idempotent tools on transient errors.
    pub max_retries: u32,
    /// Base backoff between attempts, multiplied by the attempt number.
    pub retry_backoff_ms: u64,
    /// Upper bound on a single outbound call.
    pub call_timeout_s: u64,
    /// Sessions kept per backend kind.
    pub pool_size_per_backend: usize,
    /// Stop launching new steps after the first failure.
    pub fail_fast: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff_ms: 100,
            call_timeout_s: 600,
            pool_size_per_backend: 1,
            fail_fast: true,
        }
    }
}

impl RunnerConfig {
    /// Load from a config file with environment overrides applied on
    /// top (`STRATUM_MAX_RETRIES=5` etc.).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("STRATUM").separator("__"))
            .build()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config
            .try_deserialize()
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Environment-only variant for processes configured without a
    /// file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(Environment::with_prefix("STRATUM").separator("__"))
            .build()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config
            .try_deserialize()
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }
}
