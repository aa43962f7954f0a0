use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config as cfg;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::LiveQueryError;

pub const DEFAULT_ENV_PREFIX: &str = "LIVEQUERY";

/// Upper bound for `scheduler.diagnostics_capacity`. The broadcast channel
/// allocates every slot up front.
pub const MAX_DIAGNOSTICS_CAPACITY: usize = 65_536;

/// Retry policy for failed computations.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct RetryConfig {
    /// Additional attempts after the first failure
    #[serde(default = "RetryConfig::default_max_retries")]
    pub max_retries: u32,

    /// Fixed pause between attempts, in milliseconds
    #[serde(default = "RetryConfig::default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl RetryConfig {
    fn default_max_retries() -> u32 {
        5
    }

    fn default_retry_delay_ms() -> u64 {
        2_000
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: Self::default_max_retries(),
            retry_delay_ms: Self::default_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Buffered diagnostics per subscriber before lagging receivers drop events
    #[serde(default = "SchedulerConfig::default_diagnostics_capacity")]
    pub diagnostics_capacity: usize,
}

impl SchedulerConfig {
    fn default_diagnostics_capacity() -> usize {
        256
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            diagnostics_capacity: Self::default_diagnostics_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct CacheConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl CacheConfig {
    pub fn validate(&self) -> std::result::Result<(), LiveQueryError> {
        let capacity = self.scheduler.diagnostics_capacity;
        if capacity == 0 {
            return Err(LiveQueryError::Config(
                "scheduler.diagnostics_capacity must be greater than zero".into(),
            ));
        }
        if capacity > MAX_DIAGNOSTICS_CAPACITY {
            return Err(LiveQueryError::Config(format!(
                "scheduler.diagnostics_capacity must be at most {}, got {}",
                MAX_DIAGNOSTICS_CAPACITY, capacity
            )));
        }
        Ok(())
    }

    pub fn with_retry(mut self, max_retries: u32, delay: Duration) -> Self {
        self.retry = RetryConfig {
            max_retries,
            retry_delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        };
        self
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serializing cache configuration")
    }
}

/// Layered configuration loading: optional TOML file, then environment
/// variables (`LIVEQUERY__RETRY__MAX_RETRIES=3` style).
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            file: None,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }

    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn load(&self) -> Result<CacheConfig> {
        let mut builder = cfg::Config::builder();
        if let Some(file) = &self.file {
            builder = builder.add_source(cfg::File::from(file.as_path()).required(false));
        }
        builder = builder.add_source(
            cfg::Environment::with_prefix(&self.env_prefix)
                .separator("__")
                .try_parsing(true),
        );

        let config: CacheConfig = builder
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")?;
        config.validate()?;
        debug!("Loaded cache configuration: {:?}", config);
        Ok(config)
    }
}
