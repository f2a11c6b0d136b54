//! drover.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::attribute::Attribute;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DroverConfig {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub plugin: PluginConfig,
}

/// Offer pool timing and capacity settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// How long an offer stays usable after arrival.
    pub offer_life_period_secs: u64,
    /// How long an expired offer lingers before it is declined.
    pub decline_grace_period_secs: u64,
    /// How long a lost host's offers are refused.
    pub lost_slave_grace_period_secs: u64,
    pub expiry_tick_millis: u64,
    /// Offers with this much CPU or less are declined.
    pub min_offer_cpu: f64,
    pub ingest_queue_capacity: usize,
    pub decline_queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            offer_life_period_secs: 10,
            decline_grace_period_secs: 5,
            lost_slave_grace_period_secs: 180,
            expiry_tick_millis: 1000,
            min_offer_cpu: 0.05,
            ingest_queue_capacity: 1024,
            decline_queue_capacity: 1024,
        }
    }
}

impl PoolConfig {
    pub fn offer_life_period(&self) -> Duration {
        Duration::from_secs(self.offer_life_period_secs)
    }

    pub fn decline_grace_period(&self) -> Duration {
        Duration::from_secs(self.decline_grace_period_secs)
    }

    pub fn lost_slave_grace_period(&self) -> Duration {
        Duration::from_secs(self.lost_slave_grace_period_secs)
    }

    pub fn expiry_tick(&self) -> Duration {
        Duration::from_millis(self.expiry_tick_millis.max(1))
    }
}

/// Host-attribute plugin settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub timeout_secs: u64,
    /// Attributes applied to every offer when the plugin fails or times out.
    pub default_attributes: Vec<Attribute>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            default_attributes: Vec::new(),
        }
    }
}

impl PluginConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl DroverConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: DroverConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = DroverConfig::from_toml_str("").unwrap();
        assert_eq!(config.pool.offer_life_period(), Duration::from_secs(10));
        assert_eq!(config.pool.ingest_queue_capacity, 1024);
        assert_eq!(config.plugin.timeout(), Duration::from_secs(5));
        assert!(config.plugin.default_attributes.is_empty());
    }

    #[test]
    fn parses_partial_pool_section() {
        let toml_str = r#"
[pool]
offer_life_period_secs = 30
min_offer_cpu = 0.1
"#;
        let config = DroverConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.pool.offer_life_period_secs, 30);
        assert_eq!(config.pool.min_offer_cpu, 0.1);
        assert_eq!(config.pool.decline_grace_period_secs, 5);
    }

    #[test]
    fn parses_plugin_default_attributes() {
        let toml_str = r#"
[plugin]
timeout_secs = 2

[[plugin.default_attributes]]
name = "netflow"
type = 3
text = "unknown"
"#;
        let config = DroverConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.plugin.timeout_secs, 2);
        assert_eq!(
            config.plugin.default_attributes,
            vec![Attribute::text("netflow", "unknown")]
        );
    }

    #[test]
    fn rejects_malformed_attribute() {
        let toml_str = r#"
[[plugin.default_attributes]]
name = "netflow"
type = 0
text = "unknown"
"#;
        assert!(DroverConfig::from_toml_str(toml_str).is_err());
    }
}
