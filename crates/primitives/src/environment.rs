//! The environment a wallet runs against.
//!
//! An [`Environment`] is built once by the embedding application and handed to every component
//! that needs network, endpoint or feature configuration.

use std::time::Duration;

use bitcoin::Network;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of addresses the coordination service watches ahead of the last used one.
pub const DEFAULT_EXTERNAL_WATCH_WINDOW: u32 = 15;

/// Errors raised while loading an [`Environment`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML document could not be parsed.
    #[error("invalid environment config: {0}")]
    Toml(#[from] toml::de::Error),

    /// A value parsed but is not usable.
    #[error("invalid environment value: {0}")]
    Invalid(String),
}

/// Backoff used by best-effort background synchronization.
///
/// User-initiated actions never retry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncRetryConfig {
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,

    /// Factor applied to the delay after each failed attempt.
    pub multiplier: f64,

    /// Total attempts, including the first one.
    pub max_attempts: usize,
}

impl SyncRetryConfig {
    /// Delay before the first retry.
    pub const fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }
}

impl Default for SyncRetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            multiplier: 2.0,
            max_attempts: 3,
        }
    }
}

/// Network, endpoint and feature configuration for one wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Environment {
    /// The bitcoin network keys and addresses belong to.
    pub network: Network,

    /// Base URL of the key-coordination service.
    pub houston_url: String,

    /// How many external addresses the coordination service watches ahead.
    pub external_watch_window: u32,

    /// Whether taproot (v5) receiving addresses are offered.
    pub taproot_enabled: bool,

    /// Retry behavior of background synchronization.
    pub sync_retry: SyncRetryConfig,
}

impl Environment {
    /// A regtest environment pointing at a local coordination service.
    pub fn regtest() -> Self {
        Self {
            network: Network::Regtest,
            houston_url: "http://localhost:8080".to_string(),
            external_watch_window: DEFAULT_EXTERNAL_WATCH_WINDOW,
            taproot_enabled: true,
            sync_retry: SyncRetryConfig::default(),
        }
    }

    /// A mainnet environment with the given coordination service URL.
    pub fn mainnet(houston_url: impl Into<String>) -> Self {
        Self {
            network: Network::Bitcoin,
            houston_url: houston_url.into(),
            ..Self::regtest()
        }
    }

    /// Parses an environment from TOML. Missing fields take their regtest defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let env: Self = toml::from_str(s)?;

        if env.external_watch_window == 0 {
            return Err(ConfigError::Invalid(
                "external_watch_window must be positive".to_string(),
            ));
        }
        if env.sync_retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "sync_retry.max_attempts must be positive".to_string(),
            ));
        }

        Ok(env)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::regtest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_serde_toml() {
        let config = r#"
            network = "testnet"
            houston_url = "https://houston.example.org"
            external_watch_window = 20
            taproot_enabled = false

            [sync_retry]
            initial_delay_ms = 500
            multiplier = 3.0
            max_attempts = 5
        "#;

        let env = Environment::from_toml_str(config);
        assert!(
            env.is_ok(),
            "must be able to deserialize environment from toml but got: {}",
            env.unwrap_err()
        );

        let env = env.unwrap();
        assert_eq!(env.network, Network::Testnet);
        assert_eq!(env.sync_retry.initial_delay(), Duration::from_millis(500));
        assert!(!env.taproot_enabled);

        let serialized = toml::to_string(&env).unwrap();
        let deserialized = Environment::from_toml_str(&serialized).unwrap();
        assert_eq!(deserialized, env);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let env = Environment::from_toml_str("network = \"bitcoin\"").unwrap();
        assert_eq!(env.network, Network::Bitcoin);
        assert_eq!(env.sync_retry, SyncRetryConfig::default());
        assert_eq!(env.external_watch_window, DEFAULT_EXTERNAL_WATCH_WINDOW);
        assert_eq!(env.sync_retry.initial_delay(), Duration::from_secs(1));
    }

    #[test]
    fn rejects_empty_window() {
        assert!(matches!(
            Environment::from_toml_str("external_watch_window = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Environment::from_toml_str("network = 3"),
            Err(ConfigError::Toml(_))
        ));
    }
}
