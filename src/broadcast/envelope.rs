use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::telemetry::reading::{serialize_iso8601, NormalizedReading};

/// Messages pushed to live subscribers.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PushEnvelope<'a> {
    /// First message on every new subscription
    Init {
        data: Option<&'a NormalizedReading>,
        history: &'a [NormalizedReading],
    },
    /// One per ingested reading
    Update {
        #[serde(serialize_with = "serialize_iso8601")]
        timestamp: DateTime<Utc>,
        data: &'a NormalizedReading,
    },
}

impl PushEnvelope<'_> {
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
