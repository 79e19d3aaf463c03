//! Normalized readings and the normalizer that produces them.
//!
//! Every raw broker message becomes exactly one [`NormalizedReading`]. A JSON
//! object payload is kept as structured fields; anything else falls back to
//! its text so nothing is ever dropped.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::mqtt::RawMessage;

#[derive(Clone, Debug, PartialEq)]
pub enum ReadingBody {
    Structured(Map<String, Value>),
    Raw(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedReading {
    pub body: ReadingBody,
    pub topic: String,
    /// Arrival time stamped by the broker client
    pub received_at: DateTime<Utc>,
    /// Epoch milliseconds at normalization
    pub server_time: i64,
}

impl NormalizedReading {
    pub fn field(&self, key: &str) -> Option<&Value> {
        match &self.body {
            ReadingBody::Structured(fields) => fields.get(key),
            ReadingBody::Raw(_) => None,
        }
    }

    fn text_field(&self, key: &str) -> Option<&str> {
        self.field(key)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Devices report their id either as a string or as a bare number.
    pub fn device_id(&self) -> Option<String> {
        match self.field("deviceId")? {
            Value::String(id) if !id.trim().is_empty() => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    pub fn device_name(&self) -> Option<&str> {
        self.text_field("deviceName")
    }

    pub fn device_type(&self) -> Option<&str> {
        self.text_field("deviceType")
    }

    pub fn temperature(&self) -> Option<f64> {
        self.field("temperature").and_then(Value::as_f64)
    }

    pub fn humidity(&self) -> Option<f64> {
        self.field("humidity").and_then(Value::as_f64)
    }

    /// Device-side timestamp, passed through untouched
    pub fn ts(&self) -> Option<&Value> {
        self.field("ts")
    }

    pub fn raw_text(&self) -> Option<&str> {
        match &self.body {
            ReadingBody::Raw(text) => Some(text),
            ReadingBody::Structured(_) => None,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self.body, ReadingBody::Structured(_))
    }

    /// Wire form: the structured fields (or `raw`) with the metadata written
    /// over them.
    pub fn to_json(&self) -> Value {
        let mut object = match &self.body {
            ReadingBody::Structured(fields) => fields.clone(),
            ReadingBody::Raw(text) => {
                let mut object = Map::new();
                object.insert("raw".to_string(), Value::String(text.clone()));
                object
            }
        };
        object.insert("topic".to_string(), Value::String(self.topic.clone()));
        object.insert(
            "receivedAt".to_string(),
            Value::String(iso8601(&self.received_at)),
        );
        object.insert("serverTime".to_string(), Value::from(self.server_time));
        Value::Object(object)
    }
}

impl Serialize for NormalizedReading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

pub fn iso8601(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn serialize_iso8601<S: Serializer>(
    time: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&iso8601(time))
}

pub fn normalize(message: &RawMessage) -> NormalizedReading {
    normalize_at(message, Utc::now())
}

pub fn normalize_at(message: &RawMessage, now: DateTime<Utc>) -> NormalizedReading {
    let body = match serde_json::from_slice::<Value>(&message.payload) {
        Ok(Value::Object(fields)) => ReadingBody::Structured(fields),
        _ => ReadingBody::Raw(String::from_utf8_lossy(&message.payload).into_owned()),
    };

    NormalizedReading {
        body,
        topic: message.topic.clone(),
        received_at: message.received_at,
        server_time: now.timestamp_millis(),
    }
}
