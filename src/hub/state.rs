use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tracing::debug;

use crate::broadcast::{Broadcaster, SubscriberId, Subscription};
use crate::control::{ControlEnvelope, ControlError, ControlPublisher, ControlRequest};
use crate::mqtt::ConnectionState;
use crate::telemetry::{Category, Device, DeviceRegistry, NormalizedReading, TelemetryStore, UnknownCategory};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum QueryError {
    #[error(transparent)]
    UnknownCategory(#[from] UnknownCategory),
}

/// Latest snapshot together with every known device
#[derive(Debug, Clone, Serialize)]
pub struct LatestView {
    pub snapshot: Option<NormalizedReading>,
    pub devices: Vec<Device>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStatus {
    pub broker_connected: bool,
    pub subscriber_count: usize,
    pub total_messages: u64,
    pub connected_devices: usize,
    pub latest_timestamp: Option<DateTime<Utc>>,
}

/// Cloneable query and command surface over the running hub.
///
/// Reads take short read guards and return owned data. Queries spanning the
/// store and the registry hold both guards, store first, so they never see a
/// reading applied to one and not the other.
#[derive(Debug, Clone)]
pub struct HubState {
    store: Arc<RwLock<TelemetryStore>>,
    registry: Arc<RwLock<DeviceRegistry>>,
    broadcaster: Arc<Broadcaster>,
    control: ControlPublisher,
    broker_status: watch::Receiver<ConnectionState>,
}

impl HubState {
    pub fn new(
        store: Arc<RwLock<TelemetryStore>>,
        registry: Arc<RwLock<DeviceRegistry>>,
        broadcaster: Arc<Broadcaster>,
        control: ControlPublisher,
        broker_status: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self {
            store,
            registry,
            broadcaster,
            control,
            broker_status,
        }
    }

    pub async fn get_latest(&self) -> LatestView {
        // store first, then registry, as the pipeline does
        let store = self.store.read().await;
        let registry = self.registry.read().await;
        LatestView {
            snapshot: store.latest(),
            devices: registry.list(),
        }
    }

    /// Most recent `limit` readings of `category`, oldest first.
    pub async fn get_history(
        &self,
        category: &str,
        limit: usize,
    ) -> Result<Vec<NormalizedReading>, QueryError> {
        let category: Category = category.parse()?;
        debug!(%category, limit, "History query");
        Ok(self.store.read().await.history(category, limit))
    }

    pub async fn get_devices(&self) -> Vec<Device> {
        self.registry.read().await.list()
    }

    pub async fn get_status(&self) -> HubStatus {
        let subscriber_count = self.broadcaster.subscriber_count().await;

        let store = self.store.read().await;
        let registry = self.registry.read().await;
        HubStatus {
            broker_connected: self.broker_connected(),
            subscriber_count,
            total_messages: store.total_ingested(),
            connected_devices: registry.len(),
            latest_timestamp: store.latest_received_at(),
        }
    }

    pub fn broker_connected(&self) -> bool {
        self.broker_status.borrow().is_connected()
    }

    pub fn submit_control(&self, request: ControlRequest) -> Result<ControlEnvelope, ControlError> {
        self.control.submit(request)
    }

    pub async fn connect_subscriber(&self) -> Subscription {
        self.broadcaster.join().await
    }

    pub async fn disconnect_subscriber(&self, id: SubscriberId) -> bool {
        self.broadcaster.leave(id).await
    }

    pub(crate) async fn close_subscribers(&self) {
        self.broadcaster.close_all().await;
    }
}
