use chrono::{DateTime, Utc};
use std::fmt;

/// Number of payload characters shown by the `Display` preview
const PREVIEW_LEN: usize = 32;

/// A raw `(topic, payload)` pair as delivered by the broker.
///
/// Stamped with the wall-clock arrival time by the broker client before it is
/// handed to the ingestion pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl fmt::Display for RawMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = String::from_utf8_lossy(&self.payload);
        let preview: String = text.chars().take(PREVIEW_LEN).collect();
        write!(
            f,
            "{} - {} ({} bytes): {}",
            self.received_at.format("%H:%M:%S%.3f"),
            self.topic,
            self.payload.len(),
            preview
        )
    }
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self::received_at(topic, payload, Utc::now())
    }

    pub fn received_at(
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        received_at: DateTime<Utc>,
    ) -> Self {
        RawMessage {
            topic: topic.into(),
            payload: payload.into(),
            received_at,
        }
    }

    pub fn from_publish(publish: &rumqttc::Publish) -> Self {
        Self::new(publish.topic.clone(), publish.payload.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{Publish, QoS};

    #[test]
    fn from_publish_keeps_topic_and_payload() {
        let publish = Publish::new("iot/sensors/temperature", QoS::AtLeastOnce, "21.5");
        let message = RawMessage::from_publish(&publish);

        assert_eq!(message.topic, "iot/sensors/temperature");
        assert_eq!(message.payload, b"21.5".to_vec());
    }

    #[test]
    fn display_truncates_long_payloads() {
        let payload = "x".repeat(100);
        let message = RawMessage::new("iot/sensors/humidity", payload);
        let rendered = message.to_string();

        assert!(rendered.contains("iot/sensors/humidity"));
        assert!(rendered.contains("(100 bytes)"));
        assert!(!rendered.contains(&"x".repeat(PREVIEW_LEN + 1)));
    }
}
