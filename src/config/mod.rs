//! Configuration management

use crate::domain::shared::error::DomainError;
use crate::infrastructure::queue::MIN_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix, e.g. `CALLBRIDGE__BRIDGE__QUEUE_CAPACITY=256`
pub const ENV_PREFIX: &str = "CALLBRIDGE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bridge: BridgeConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// How long a call may stay in `Reconnecting` before it fails
    pub reconnect_timeout_ms: u64,
    /// Events held for absent listeners before the oldest are dropped
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set
    pub level: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            reconnect_timeout_ms: 30_000,
            queue_capacity: 1024,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.reconnect_timeout_ms == 0 {
            return Err(DomainError::ValidationError(
                "reconnect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.queue_capacity < MIN_CAPACITY {
            return Err(DomainError::ValidationError(format!(
                "queue_capacity must be at least {}",
                MIN_CAPACITY
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then environment overrides
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.bridge.validate()?;
        Ok(config)
    }
}
