//! Environment-driven configuration for [`crate::store::PolicyStore`],
//! following the same `from_env`/`validate` shape as
//! `abac-providers::ResolverConfig`.

use std::env;

use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse {variable} ('{value}') as {expected}")]
    InvalidValue {
        variable: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("{field} must be greater than zero, got {value}")]
    MustBePositive { field: &'static str, value: u64 },
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Capacity of the `policy_changed` broadcast channel. A slow or absent
    /// subscriber never blocks a writer; it only risks missing a
    /// notification if the channel overflows, per §5's documented
    /// "observers must refresh periodically" fallback.
    pub notification_channel_capacity: usize,
    pub log_level: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            notification_channel_capacity: crate::store::POLICY_CHANGED_CHANNEL_CAPACITY,
            log_level: "info".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = StoreConfig::default();

        if let Ok(value) = env::var("POLICY_STORE_NOTIFICATION_CHANNEL_CAPACITY") {
            config.notification_channel_capacity = value
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue {
                    variable: "POLICY_STORE_NOTIFICATION_CHANNEL_CAPACITY",
                    value: value.clone(),
                    expected: "u64",
                })? as usize;
        }

        if let Ok(level) = env::var("LOG_LEVEL") {
            if !level.trim().is_empty() {
                config.log_level = level;
            }
        }

        config.validate()?;

        info!(
            notification_channel_capacity = config.notification_channel_capacity,
            "policy store configuration resolved"
        );

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.notification_channel_capacity == 0 {
            return Err(ConfigError::MustBePositive {
                field: "notification_channel_capacity",
                value: 0,
            });
        }
        Ok(())
    }
}
