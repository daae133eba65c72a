//! Runtime and Pool Configuration
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then `ACTOR_MESH_*` environment variables (nested keys separated by
//! `__`, e.g. `ACTOR_MESH_RUNTIME__RECEIVE_TIMEOUT_MS=5000`).

use crate::error::{ActorError, Result};
use crate::transport::{CancellationToken, ReceiveOptions};
use anyhow::Context as _;
use config_crate::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "ACTOR_MESH";

/// Timing knobs shared by every actor in a topology
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Deadline for a single blocking receive; unset blocks forever
    pub receive_timeout_ms: Option<u64>,
    /// Deadline for joining each member; unset waits forever
    pub join_timeout_ms: Option<u64>,
    /// How often blocked receivers check cancellation and liveness
    pub poll_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            receive_timeout_ms: None,
            join_timeout_ms: None,
            poll_interval_ms: 25,
        }
    }
}

impl RuntimeConfig {
    pub fn receive_timeout(&self) -> Option<Duration> {
        self.receive_timeout_ms.map(Duration::from_millis)
    }

    pub fn join_timeout(&self) -> Option<Duration> {
        self.join_timeout_ms.map(Duration::from_millis)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Receive options bound to `cancel`
    pub fn receive_options(&self, cancel: CancellationToken) -> ReceiveOptions {
        ReceiveOptions {
            timeout: self.receive_timeout(),
            poll_interval: self.poll_interval(),
            cancel,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(ActorError::configuration(
                "poll interval must be at least 1ms",
                Some("runtime.poll_interval_ms"),
            ));
        }
        if self.receive_timeout_ms == Some(0) {
            return Err(ActorError::configuration(
                "receive timeout must be positive when set",
                Some("runtime.receive_timeout_ms"),
            ));
        }
        Ok(())
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on concurrently running workers
    pub workers: usize,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,
    pub runtime: RuntimeConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            log_level: "info".to_string(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Pool of `workers` with default runtime settings
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Load configuration with file and environment overrides
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading pool config: {:?}", path);
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: PoolConfig = builder
            .build()
            .context("Failed to build pool configuration")?
            .try_deserialize()
            .context("Failed to deserialize pool configuration")?;

        config.validate()?;
        debug!(workers = config.workers, "Pool configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ActorError::configuration(
                "worker count must be positive",
                Some("workers"),
            ));
        }
        self.runtime.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PoolConfig::default();
        assert!(config.workers >= 1);
        assert_eq!(config.log_level, "info");
        assert!(config.validate().is_ok());
        assert_eq!(config.runtime.receive_timeout(), None);
        assert_eq!(config.runtime.poll_interval(), Duration::from_millis(25));
    }

    #[test]
    fn test_validation() {
        assert!(PoolConfig::with_workers(0).validate().is_err());

        let mut config = PoolConfig::with_workers(2);
        config.runtime.poll_interval_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ActorError::Configuration { field: Some(f), .. }) if f == "runtime.poll_interval_ms"
        ));

        config.runtime.poll_interval_ms = 10;
        config.runtime.receive_timeout_ms = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_receive_options() {
        let runtime = RuntimeConfig {
            receive_timeout_ms: Some(1500),
            join_timeout_ms: Some(200),
            poll_interval_ms: 5,
        };
        let token = CancellationToken::new();
        let options = runtime.receive_options(token.clone());
        assert_eq!(options.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(options.poll_interval, Duration::from_millis(5));
        assert_eq!(runtime.join_timeout(), Some(Duration::from_millis(200)));

        token.cancel();
        assert!(options.cancel.is_cancelled());
    }
}
