use std::env;

use serde::{Deserialize, Serialize};
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

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Capacity of the per-request LRU cache of resolved entity fragments.
    pub request_cache_capacity: usize,
    /// Deadline a single provider call gets before it's treated as a fault.
    pub provider_timeout_ms: u64,
    /// Sub-deadline the property provider's parent-location lookup gets.
    pub parent_location_timeout_ms: u64,
    pub log_level: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            request_cache_capacity: 100,
            provider_timeout_ms: 250,
            parent_location_timeout_ms: 100,
            log_level: "info".to_string(),
        }
    }
}

impl ResolverConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = ResolverConfig::default();

        if let Ok(value) = env::var("RESOLVER_CACHE_CAPACITY") {
            config.request_cache_capacity = parse_u64(&value, "RESOLVER_CACHE_CAPACITY")? as usize;
        }

        if let Ok(value) = env::var("RESOLVER_PROVIDER_TIMEOUT_MS") {
            config.provider_timeout_ms = parse_u64(&value, "RESOLVER_PROVIDER_TIMEOUT_MS")?;
        }

        if let Ok(value) = env::var("RESOLVER_PARENT_LOCATION_TIMEOUT_MS") {
            config.parent_location_timeout_ms = parse_u64(&value, "RESOLVER_PARENT_LOCATION_TIMEOUT_MS")?;
        }

        if let Ok(level) = env::var("LOG_LEVEL") {
            if !level.trim().is_empty() {
                config.log_level = level;
            }
        }

        config.validate()?;

        info!(
            request_cache_capacity = config.request_cache_capacity,
            provider_timeout_ms = config.provider_timeout_ms,
            "resolver configuration resolved"
        );

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_cache_capacity == 0 {
            return Err(ConfigError::MustBePositive {
                field: "request_cache_capacity",
                value: 0,
            });
        }
        if self.provider_timeout_ms == 0 {
            return Err(ConfigError::MustBePositive {
                field: "provider_timeout_ms",
                value: 0,
            });
        }
        if self.parent_location_timeout_ms == 0 {
            return Err(ConfigError::MustBePositive {
                field: "parent_location_timeout_ms",
                value: 0,
            });
        }
        Ok(())
    }
}

fn parse_u64(value: &str, variable: &'static str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
        variable,
        value: value.to_string(),
        expected: "u64",
    })
}
