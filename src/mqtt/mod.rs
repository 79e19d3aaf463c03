//! # MQTT Integration Module
//!
//! Broker connectivity for the telemetry hub. Device readings arrive on the
//! configured topics and control envelopes leave through the same client.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker connection settings and defaults
//! ├── message_manager.rs  - Raw (topic, payload) messages handed to ingestion
//! └── mqtt_handler.rs     - Connection lifecycle, resubscription, reconnect loop
//! ```
//!
//! ## Design Philosophy
//!
//! - **At-least-once delivery**: every topic is subscribed with QoS 1 and every
//!   received publish is forwarded, in arrival order, without coalescing
//! - **Self-healing connection**: a lost connection is retried at a fixed
//!   interval forever; topics are re-requested on every connect acknowledgement
//! - **Explicit outcomes**: subscribe and publish return `Result` values instead
//!   of reporting through callbacks

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;

pub use config::BrokerConfig;
pub use message_manager::RawMessage;
pub use mqtt_handler::{BrokerClient, BrokerError, BrokerLink, ConnectionState, EventOutcome};

#[cfg(test)]
pub(crate) mod test_support {
    use super::{BrokerError, BrokerLink};
    use rumqttc::{ClientError, QoS, Request, Subscribe};
    use std::sync::Mutex;

    /// In-memory broker link that records every request it receives.
    #[derive(Debug, Default)]
    pub struct RecordingLink {
        failing_topic: Option<String>,
        subscriptions: Mutex<Vec<String>>,
        publishes: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl RecordingLink {
        pub fn failing_on(topic: &str) -> Self {
            Self {
                failing_topic: Some(topic.to_string()),
                ..Self::default()
            }
        }

        pub fn subscriptions(&self) -> Vec<String> {
            self.subscriptions.lock().unwrap().clone()
        }

        pub fn publishes(&self) -> Vec<(String, Vec<u8>)> {
            self.publishes.lock().unwrap().clone()
        }

        pub fn clear(&self) {
            self.subscriptions.lock().unwrap().clear();
            self.publishes.lock().unwrap().clear();
        }
    }

    impl BrokerLink for RecordingLink {
        fn subscribe(&self, topic: &str) -> Result<(), BrokerError> {
            if self.failing_topic.as_deref() == Some(topic) {
                let request = Request::Subscribe(Subscribe::new(topic, QoS::AtLeastOnce));
                return Err(BrokerError::Client(ClientError::TryRequest(request)));
            }
            self.subscriptions.lock().unwrap().push(topic.to_string());
            Ok(())
        }

        fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
            self.publishes
                .lock()
                .unwrap()
                .push((topic.to_string(), payload));
            Ok(())
        }

        fn disconnect(&self) -> Result<(), BrokerError> {
            Ok(())
        }
    }
}
