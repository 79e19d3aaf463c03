use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Broker connection settings for the telemetry hub.
///
/// Loaded once at startup as part of [`crate::config::HubConfig`] and never
/// mutated afterwards. Every field has a default so partial TOML files work.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker host name or IP address
    pub host: String,
    /// Broker TCP port
    pub port: u16,
    /// MQTT client identifier presented on connect
    pub client_id: String,
    /// Optional username, only used together with `password`
    pub username: Option<String>,
    /// Optional password, only used together with `username`
    pub password: Option<String>,
    /// Keep-alive interval in seconds
    pub keep_alive_secs: u64,
    /// Fixed delay between reconnect attempts in milliseconds
    pub reconnect_interval_ms: u64,
    /// Capacity of the rumqttc request queue (subscribe/publish requests)
    pub request_capacity: usize,
    /// Capacity of the channel between the broker client and the ingestion pipeline
    pub ingest_queue_capacity: usize,
    /// Topics subscribed on every (re)connect
    pub topics: Vec<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: format!("telemetry-hub-{}", std::process::id()),
            username: None,
            password: None,
            keep_alive_secs: 30,
            reconnect_interval_ms: 1000,
            request_capacity: 100,
            ingest_queue_capacity: 1000,
            topics: vec![
                "iot/sensors/temperature".to_string(),
                "iot/sensors/humidity".to_string(),
            ],
        }
    }
}

impl BrokerConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Credentials are only applied when both halves are present.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }
}
