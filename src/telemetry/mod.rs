//! Telemetry data model and in-memory state
//!
//! 1. [`reading`] - Normalization of raw broker messages
//! 2. [`history`] - Categories and bounded history buffers
//! 3. [`store`] - Latest snapshot and per-category history
//! 4. [`registry`] - Live device registry
//!
//! ```text
//! RawMessage ──► normalize ──► NormalizedReading ──┬─► TelemetryStore
//!                                                  └─► DeviceRegistry
//! ```

pub mod history;
pub mod reading;
pub mod registry;
pub mod store;

pub use history::{Category, HistoryBuffer, UnknownCategory};
pub use reading::{normalize, NormalizedReading, ReadingBody};
pub use registry::{Device, DeviceRegistry};
pub use store::TelemetryStore;
