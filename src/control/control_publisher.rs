use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::mqtt::{BrokerError, BrokerLink};

/// Value of the `source` field on every envelope this hub emits
pub const CONTROL_SOURCE: &str = "web-server";

pub fn control_topic(device_id: &str) -> String {
    format!("iot/device/{device_id}/control")
}

/// Control command as submitted by a caller. Every field is optional on the
/// wire; validation happens in [`ControlPublisher::submit`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRequest {
    pub device_id: Option<String>,
    pub command: Option<String>,
    pub params: Option<Map<String, Value>>,
}

impl ControlRequest {
    pub fn new(device_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
            command: Some(command.into()),
            params: None,
        }
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = Some(params);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlEnvelope {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub target: String,
    pub command: String,
    pub params: Map<String, Value>,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub source: &'static str,
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("deviceId is required")]
    MissingDeviceId,

    #[error("command is required")]
    MissingCommand,

    #[error("deviceId {0:?} cannot be used in a topic")]
    InvalidDeviceId(String),

    #[error("Failed to encode control envelope: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to publish control envelope: {0}")]
    Broker(#[from] BrokerError),
}

impl ControlError {
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ControlError::MissingDeviceId
                | ControlError::MissingCommand
                | ControlError::InvalidDeviceId(_)
        )
    }
}

fn required(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

// Topic separators and wildcards would escape the device's control topic
fn topic_safe(device_id: &str) -> Result<&str, ControlError> {
    if device_id.contains(['/', '+', '#']) {
        return Err(ControlError::InvalidDeviceId(device_id.to_string()));
    }
    Ok(device_id)
}

/// Validates control requests and publishes them, fire-and-forget, on the
/// per-device control topic.
#[derive(Debug, Clone)]
pub struct ControlPublisher {
    link: Arc<dyn BrokerLink>,
}

impl ControlPublisher {
    pub fn new(link: Arc<dyn BrokerLink>) -> Self {
        Self { link }
    }

    pub fn submit(&self, request: ControlRequest) -> Result<ControlEnvelope, ControlError> {
        let target = required(request.device_id.as_deref()).ok_or(ControlError::MissingDeviceId)?;
        let target = topic_safe(target)?;
        let command = required(request.command.as_deref()).ok_or(ControlError::MissingCommand)?;

        let envelope = ControlEnvelope {
            kind: "control",
            target: target.to_string(),
            command: command.to_string(),
            params: request.params.unwrap_or_default(),
            timestamp: Utc::now().timestamp_millis(),
            source: CONTROL_SOURCE,
        };

        let topic = control_topic(&envelope.target);
        let payload = serde_json::to_vec(&envelope)?;

        if let Err(e) = self.link.publish(&topic, payload) {
            warn!(topic = %topic, error = %e, "Control envelope rejected by broker client");
            return Err(e.into());
        }

        info!(
            topic = %topic,
            command = %envelope.command,
            "Published control command"
        );
        Ok(envelope)
    }
}
