//! Outbound device control
//!
//! Commands are validated, wrapped in a control envelope and published to
//! `iot/device/{deviceId}/control` through the broker client's publish path.

pub mod control_publisher;

pub use control_publisher::{
    control_topic, ControlEnvelope, ControlError, ControlPublisher, ControlRequest, CONTROL_SOURCE,
};
