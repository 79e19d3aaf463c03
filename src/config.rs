//! # Hub Configuration
//!
//! The hub reads one immutable [`HubConfig`] at startup. It is stored as TOML
//! so it can be edited by hand; every key has a default, so a partial file (or
//! an empty one) still yields a complete configuration.
//!
//! When no file exists at the expected location a default one is written, in
//! the same spirit as a first-run setup: the hub always starts, and the file
//! documents every available setting.

use color_eyre::eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::mqtt::BrokerConfig;
use crate::telemetry::Category;

const CONFIG_DIR: &str = "telemetry-hub";
const CONFIG_FILE: &str = "config.toml";

/// rumqttc refuses keep-alive intervals below this
const MIN_KEEP_ALIVE_SECS: u64 = 5;

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum entries kept per category
    pub capacity: usize,
    /// Category whose recent history is sent to new subscribers
    pub default_category: Category,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            default_category: Category::Temperature,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Envelopes buffered per subscriber before it is considered stalled
    pub subscriber_queue_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_queue_capacity: 256,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct HubConfig {
    /// Interval of the periodic status log line, 0 disables it
    pub status_log_interval_secs: u64,
    pub broker: BrokerConfig,
    pub history: HistoryConfig,
    pub broadcast: BroadcastConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            status_log_interval_secs: 60,
            broker: BrokerConfig::default(),
            history: HistoryConfig::default(),
            broadcast: BroadcastConfig::default(),
        }
    }
}

impl HubConfig {
    /// `<config dir>/telemetry-hub/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir().ok_or_else(|| eyre!("No configuration directory available"))?;
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        Ok(path)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: HubConfig =
            toml::from_str(content).map_err(|e| eyre!("Failed to parse configuration: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read configuration {}: {}", path.display(), e))?;
        let config = Self::from_toml(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Writes the default configuration to `path` unless a file already exists.
    pub async fn ensure_default_config(path: &Path) -> Result<()> {
        if tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check configuration file: {}", e))?
        {
            debug!(path = %path.display(), "Configuration file present");
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create configuration directory: {}", e))?;
        }

        let content = toml::to_string_pretty(&HubConfig::default())
            .map_err(|e| eyre!("Failed to serialize default configuration: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write default configuration: {}", e))?;

        info!(path = %path.display(), "Wrote default configuration");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.broker.host.trim().is_empty() {
            return Err(eyre!("broker.host must not be empty"));
        }
        if self.broker.client_id.trim().is_empty() {
            return Err(eyre!("broker.client_id must not be empty"));
        }
        if self.broker.topics.is_empty() {
            return Err(eyre!("broker.topics must list at least one topic"));
        }
        if self.broker.topics.iter().any(|t| t.trim().is_empty()) {
            return Err(eyre!("broker.topics must not contain empty topics"));
        }
        if self.broker.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            return Err(eyre!(
                "broker.keep_alive_secs must be at least {}",
                MIN_KEEP_ALIVE_SECS
            ));
        }
        if self.broker.request_capacity == 0 || self.broker.ingest_queue_capacity == 0 {
            return Err(eyre!("broker queue capacities must be greater than zero"));
        }
        if self.history.capacity == 0 {
            return Err(eyre!("history.capacity must be greater than zero"));
        }
        if self.broadcast.subscriber_queue_capacity == 0 {
            return Err(eyre!(
                "broadcast.subscriber_queue_capacity must be greater than zero"
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = HubConfig::from_toml("").unwrap();
        assert_eq!(config, HubConfig::default());
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let config = HubConfig::from_toml(
            r#"
            [broker]
            host = "broker.local"
            topics = ["farm/temperature"]

            [history]
            capacity = 5
            default_category = "humidity"
            "#,
        )
        .unwrap();

        assert_eq!(config.broker.host, "broker.local");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.topics, vec!["farm/temperature".to_string()]);
        assert_eq!(config.history.capacity, 5);
        assert_eq!(config.history.default_category, Category::Humidity);
        assert_eq!(config.broadcast.subscriber_queue_capacity, 256);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(HubConfig::from_toml("[history]\ncapacity = 0").is_err());
        assert!(HubConfig::from_toml("[broker]\ntopics = []").is_err());
        assert!(HubConfig::from_toml("[broker]\nkeep_alive_secs = 1").is_err());
        assert!(HubConfig::from_toml("[history]\ndefault_category = \"pressure\"").is_err());
    }

    #[tokio::test]
    async fn ensure_default_config_writes_a_loadable_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        HubConfig::ensure_default_config(&path).await.unwrap();
        let loaded = HubConfig::load(&path).await.unwrap();
        assert_eq!(loaded.history, HistoryConfig::default());

        tokio::fs::write(&path, "[history]\ncapacity = 7\n").await.unwrap();
        HubConfig::ensure_default_config(&path).await.unwrap();
        let loaded = HubConfig::load(&path).await.unwrap();
        assert_eq!(loaded.history.capacity, 7);
    }
}
