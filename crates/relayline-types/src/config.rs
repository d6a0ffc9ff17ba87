//! Configuration types.
//!
//! Every field has a default, so a partial TOML file (or none at all) yields
//! a usable configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Transport event name used when none is configured.
pub const DEFAULT_EVENT: &str = "connection.event";

/// Default deadline for a correlated request.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Default period of the expiry sweep.
pub const DEFAULT_REAP_INTERVAL_MS: u64 = 1_000;

/// Settings for a connection engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Event name carrying raw request/response frames.
    pub raw_event: String,
    /// Event name carrying REST request/response frames.
    pub rest_event: String,
    /// How long a correlated request may stay pending.
    pub request_timeout_ms: u64,
    /// How often overdue requests are swept.
    pub reap_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            raw_event: DEFAULT_EVENT.to_string(),
            rest_event: DEFAULT_EVENT.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            reap_interval_ms: DEFAULT_REAP_INTERVAL_MS,
        }
    }
}

impl EngineConfig {
    /// Use one event name for both frame families.
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        let event = event.into();
        self.rest_event = event.clone();
        self.raw_event = event;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.raw_event.is_empty() || self.rest_event.is_empty() {
            return Err(ConfigError::Invalid("event names must not be empty".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_ms must be positive".into(),
            ));
        }
        if self.reap_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "reap_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Top-level configuration for the `relayline` binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaylineConfig {
    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Address the TCP transport binds in server mode.
    pub listen_addr: String,
    pub engine: EngineConfig,
}

impl Default for RelaylineConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            listen_addr: "127.0.0.1:4300".to_string(),
            engine: EngineConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.raw_event, "connection.event");
        assert_eq!(config.rest_event, "connection.event");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config: RelaylineConfig = toml::from_str(
            r#"
            log_level = "debug"

            [engine]
            rest_event = "connection.rest"
            request_timeout_ms = 500
        "#,
        )
        .unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.listen_addr, "127.0.0.1:4300");
        assert_eq!(config.engine.raw_event, DEFAULT_EVENT);
        assert_eq!(config.engine.rest_event, "connection.rest");
        assert_eq!(config.engine.request_timeout(), Duration::from_millis(500));
        assert_eq!(config.engine.reap_interval_ms, DEFAULT_REAP_INTERVAL_MS);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = EngineConfig::default().with_event("");
        assert!(config.validate().is_err());

        let config = EngineConfig {
            request_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_event_sets_both() {
        let config = EngineConfig::default().with_event("bus");
        assert_eq!(config.raw_event, "bus");
        assert_eq!(config.rest_event, "bus");
    }
}
