use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::reading::{serialize_iso8601, NormalizedReading};

const DEFAULT_DEVICE_TYPE: &str = "sensor";

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(serialize_with = "serialize_iso8601")]
    pub first_seen: DateTime<Utc>,
    #[serde(serialize_with = "serialize_iso8601")]
    pub last_seen: DateTime<Utc>,
    pub message_count: u64,
    pub last_data: NormalizedReading,
}

impl Device {
    fn first_reading(id: String, reading: &NormalizedReading) -> Self {
        let name = reading
            .device_name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("device-{id}"));
        let device_type = reading
            .device_type()
            .unwrap_or(DEFAULT_DEVICE_TYPE)
            .to_string();

        Self {
            id,
            name,
            device_type,
            first_seen: reading.received_at,
            last_seen: reading.received_at,
            message_count: 0,
            last_data: reading.clone(),
        }
    }

    fn observe(&mut self, reading: &NormalizedReading) {
        self.last_seen = self.last_seen.max(reading.received_at);
        self.message_count += 1;
        self.last_data = reading.clone();
    }
}

/// Devices seen on the broker, kept in first-seen order.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
    index: HashMap<String, usize>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `reading` against its device. Readings without a `deviceId` are
    /// ignored. Returns the device's message count after the update.
    pub fn record(&mut self, reading: &NormalizedReading) -> Option<u64> {
        let id = reading.device_id()?;

        let slot = match self.index.get(&id) {
            Some(&slot) => slot,
            None => {
                let slot = self.devices.len();
                info!(device = %id, topic = %reading.topic, "New device registered");
                self.devices.push(Device::first_reading(id.clone(), reading));
                self.index.insert(id, slot);
                slot
            }
        };

        let device = &mut self.devices[slot];
        device.observe(reading);
        debug!(device = %device.id, count = device.message_count, "Device updated");
        Some(device.message_count)
    }

    pub fn list(&self) -> Vec<Device> {
        self.devices.clone()
    }

    pub fn get(&self, id: &str) -> Option<Device> {
        self.index.get(id).map(|&slot| self.devices[slot].clone())
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
