//! Engine configuration with TOML file support.

use serde::{Deserialize, Serialize};

use crate::core::suffrage::{Threshold, DEFAULT_SUFFRAGE_THRESHOLD_PCT};
use crate::error::{CurrencyError, Result};

/// Configuration of a processing engine.
///
/// Network limits (max suffrage size, candidate lifespan) are ledger state,
/// read under the `network_policy` key; they do not belong here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Mixed into every signature digest.
    #[serde(default = "default_network_id")]
    pub network_id: String,

    /// Percent of suffrage nodes that must sign node-level operations.
    #[serde(default = "default_suffrage_threshold")]
    pub suffrage_threshold: u8,

    /// Idle processors kept per operation kind.
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,

    /// Reject a second operation of the same sender (or on the same currency)
    /// within one height.
    #[serde(default)]
    pub one_operation_per_sender: bool,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter, e.g. "info" or "debug,currency_core=trace".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_network_id() -> String {
    "currency-local".to_string()
}

fn default_suffrage_threshold() -> u8 {
    DEFAULT_SUFFRAGE_THRESHOLD_PCT
}

fn default_pool_capacity() -> usize {
    64
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CurrencyError::Config(format!("{}: {}", path, e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| CurrencyError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CurrencyError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.network_id.is_empty() {
            return Err(CurrencyError::Config("network_id must not be empty".to_string()));
        }
        self.threshold()?;
        if self.pool_capacity == 0 {
            return Err(CurrencyError::Config(
                "pool_capacity must be over zero".to_string(),
            ));
        }
        if !matches!(self.log_format.as_str(), "human" | "json") {
            return Err(CurrencyError::Config(format!(
                "unknown log_format {:?}",
                self.log_format
            )));
        }
        Ok(())
    }

    pub fn network_id(&self) -> &[u8] {
        self.network_id.as_bytes()
    }

    pub fn threshold(&self) -> Result<Threshold> {
        Threshold::new(self.suffrage_threshold)
            .map_err(|e| CurrencyError::Config(e.to_string()))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            network_id: default_network_id(),
            suffrage_threshold: default_suffrage_threshold(),
            pool_capacity: default_pool_capacity(),
            one_operation_per_sender: false,
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = EngineConfig::default();
        let parsed = EngineConfig::from_toml_str(&config.to_toml_string().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.network_id, "currency-local");
        assert_eq!(config.suffrage_threshold, 67);
        assert_eq!(config.pool_capacity, 64);
        assert!(!config.one_operation_per_sender);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config = EngineConfig::from_toml_str(
            r#"
            network_id = "mainnet"
            suffrage_threshold = 100
            one_operation_per_sender = true
            "#,
        )
        .unwrap();
        assert_eq!(config.network_id(), b"mainnet");
        assert_eq!(config.threshold().unwrap().percent(), 100);
        assert!(config.one_operation_per_sender);
        assert_eq!(config.pool_capacity, 64);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(EngineConfig::from_toml_str("suffrage_threshold = 0").is_err());
        assert!(EngineConfig::from_toml_str("suffrage_threshold = 101").is_err());
        assert!(EngineConfig::from_toml_str("pool_capacity = 0").is_err());
        assert!(EngineConfig::from_toml_str(r#"log_format = "xml""#).is_err());
        assert!(EngineConfig::from_toml_str(r#"network_id = """#).is_err());
        assert!(EngineConfig::from_toml_str("suffrage_threshold = \"high\"").is_err());
    }
}
