//! Configuration module for the configurator engine
//!
//! Handles configuration loading from TOML files and environment
//! variables, and provides structured configuration types.

use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Pricing policy (tax rate, delivery taxability)
    #[serde(default)]
    pub pricing: TaxPolicy,

    /// Autosave scheduler tuning
    #[serde(default)]
    pub autosave: AutosaveConfig,

    /// Anonymous customization cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Build persistence endpoint
    #[serde(default)]
    pub repository: RepositoryConfig,

    /// Delivery quote endpoint
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Monitoring and metrics
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Tax policy applied by the pricing calculator.
///
/// Whether the delivery fee is taxable is jurisdiction-dependent; it is a
/// policy input here, not a hard-coded rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TaxPolicy {
    /// Flat regional rate in basis points (625 = 6.25%)
    #[serde(default = "default_tax_rate_bps")]
    pub tax_rate_bps: i64,

    /// Include the delivery fee in the taxable amount
    #[serde(default = "default_true")]
    pub delivery_taxable: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AutosaveConfig {
    /// Debounce window in milliseconds; edits inside the window coalesce
    /// into one write
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Bounded timeout for repository calls in seconds
    #[serde(default = "default_save_timeout")]
    pub save_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory for the sled-backed anonymous cache
    #[serde(default = "default_cache_path")]
    pub path: String,

    /// Entries older than this are removed by housekeeping
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Base URL of the build persistence endpoint
    #[serde(default = "default_repository_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Quote endpoint URL
    #[serde(default = "default_quote_url")]
    pub endpoint: String,

    /// Request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

// Default value functions
fn default_tax_rate_bps() -> i64 { 625 }
fn default_debounce_ms() -> u64 { 2_000 }
fn default_save_timeout() -> u64 { 10 }
fn default_cache_path() -> String { ".configurator-cache".to_string() }
fn default_retention_days() -> i64 { 30 }
fn default_repository_url() -> String { "http://localhost:8080".to_string() }
fn default_quote_url() -> String { "http://localhost:8081/quote".to_string() }
fn default_http_timeout() -> u64 { 10 }
fn default_metrics_port() -> u16 { 9090 }
fn default_true() -> bool { true }

impl Default for TaxPolicy {
    fn default() -> Self {
        Self {
            tax_rate_bps: default_tax_rate_bps(),
            delivery_taxable: default_true(),
        }
    }
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            save_timeout_secs: default_save_timeout(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            retention_days: default_retention_days(),
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            base_url: default_repository_url(),
            timeout_secs: default_http_timeout(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            endpoint: default_quote_url(),
            timeout_secs: default_http_timeout(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: default_true(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pricing: TaxPolicy::default(),
            autosave: AutosaveConfig::default(),
            cache: CacheConfig::default(),
            repository: RepositoryConfig::default(),
            delivery: DeliveryConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_file(path)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.pricing.tax_rate_bps < 0 || self.pricing.tax_rate_bps > 10_000 {
            return Err(EngineError::Configuration(format!(
                "tax_rate_bps {} outside 0..=10000",
                self.pricing.tax_rate_bps
            )));
        }
        if self.autosave.debounce_ms == 0 {
            return Err(EngineError::Configuration(
                "debounce_ms must be positive".into(),
            ));
        }
        if self.cache.retention_days <= 0 {
            return Err(EngineError::Configuration(
                "retention_days must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.pricing.tax_rate_bps, 625);
        assert!(config.pricing.delivery_taxable);
        assert_eq!(config.autosave.debounce_ms, 2_000);
        assert_eq!(config.cache.retention_days, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
            [pricing]
            tax_rate_bps = 700
            delivery_taxable = false

            [autosave]
            debounce_ms = 1500
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.pricing.tax_rate_bps, 700);
        assert!(!config.pricing.delivery_taxable);
        assert_eq!(config.autosave.debounce_ms, 1500);
        // Untouched sections fall back to defaults
        assert_eq!(config.repository.timeout_secs, 10);
    }

    #[test]
    fn test_validate_rejects_bad_rate() {
        let mut config = Config::default();
        config.pricing.tax_rate_bps = 20_000;
        assert!(matches!(
            config.validate().unwrap_err(),
            EngineError::Configuration(_)
        ));

        config.pricing.tax_rate_bps = -1;
        assert!(config.validate().is_err());
    }
}
