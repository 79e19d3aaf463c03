//! Hub Handle - Lifecycle of the running telemetry hub
//!
//! Wires the broker client, the ingestion pipeline and the broadcaster
//! together, exposes the query surface as a [`HubState`] and tears everything
//! down again in a fixed order on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::pipeline::{run_pipeline_loop, IngestPipeline};
use super::state::HubState;
use crate::broadcast::Broadcaster;
use crate::config::HubConfig;
use crate::control::ControlPublisher;
use crate::mqtt::{BrokerClient, BrokerLink, ConnectionState, RawMessage};
use crate::telemetry::{DeviceRegistry, TelemetryStore};

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The configuration failed validation; nothing was started
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Handle for the running hub
///
/// # Task Model
///
/// ```text
/// BrokerClient ─[RawMessage]→ IngestPipeline ─┬→ TelemetryStore / DeviceRegistry
///  (rumqttc)    (mpsc, bounded)               └→ Broadcaster → subscribers
/// ```
///
/// Up to three tokio tasks run behind the handle: the broker event loop, the
/// ingestion pipeline and the optional status reporter. All of them observe
/// one cancellation token.
///
/// # Shutdown Order
///
/// 1. Cancel the token
/// 2. Wait for the broker task, which sends a disconnect before returning
/// 3. Wait for the pipeline task
/// 4. Close every subscriber queue
pub struct HubHandle {
    state: HubState,
    cancel: CancellationToken,
    broker_task: Option<JoinHandle<()>>,
    pipeline_task: JoinHandle<()>,
    status_task: Option<JoinHandle<()>>,
}

impl HubHandle {
    /// Validates `config`, creates the rumqttc client and starts every task.
    ///
    /// The broker connection is established in the background; the hub is
    /// queryable immediately and reports `brokerConnected: false` until the
    /// broker acknowledges the connection.
    pub fn spawn(config: &HubConfig) -> Result<Self, HubError> {
        config
            .validate()
            .map_err(|e| HubError::InvalidConfig(e.to_string()))?;
        info!("Initializing telemetry hub");

        let (message_tx, message_rx) = mpsc::channel(config.broker.ingest_queue_capacity);
        debug!(
            capacity = config.broker.ingest_queue_capacity,
            "Created ingest channel"
        );

        let (client, eventloop) = BrokerClient::connect(&config.broker, message_tx);
        let link = client.link();
        let status = client.status();

        let cancel = CancellationToken::new();
        let broker_cancel = cancel.clone();
        let broker_task = tokio::spawn(async move {
            client.run(eventloop, broker_cancel).await;
        });
        info!("Broker client spawned");

        let mut handle = Self::assemble(config, link, message_rx, status, cancel);
        handle.broker_task = Some(broker_task);

        info!("Telemetry hub initialized");
        Ok(handle)
    }

    /// Starts the hub on top of an existing broker link.
    ///
    /// Raw messages are read from `messages` and the connection flag follows
    /// `broker_status`; whoever owns the sending sides plays the broker.
    pub fn spawn_with_link(
        config: &HubConfig,
        link: Arc<dyn BrokerLink>,
        messages: mpsc::Receiver<RawMessage>,
        broker_status: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self::assemble(config, link, messages, broker_status, CancellationToken::new())
    }

    fn assemble(
        config: &HubConfig,
        link: Arc<dyn BrokerLink>,
        messages: mpsc::Receiver<RawMessage>,
        broker_status: watch::Receiver<ConnectionState>,
        cancel: CancellationToken,
    ) -> Self {
        let store = Arc::new(RwLock::new(TelemetryStore::new(config.history.capacity)));
        let registry = Arc::new(RwLock::new(DeviceRegistry::new()));
        let broadcaster = Arc::new(Broadcaster::new(
            store.clone(),
            config.history.default_category,
            config.broadcast.subscriber_queue_capacity,
        ));

        let pipeline =
            IngestPipeline::create(messages, store.clone(), registry.clone(), broadcaster.clone());
        let pipeline_cancel = cancel.clone();
        let pipeline_task = tokio::spawn(async move {
            if let Err(e) = run_pipeline_loop(pipeline, pipeline_cancel).await {
                error!("Ingestion pipeline error: {}", e);
            }
        });
        info!("Ingestion pipeline spawned");

        let state = HubState::new(
            store,
            registry,
            broadcaster,
            ControlPublisher::new(link),
            broker_status,
        );

        let status_task = (config.status_log_interval_secs > 0).then(|| {
            spawn_status_reporter(
                state.clone(),
                Duration::from_secs(config.status_log_interval_secs),
                cancel.clone(),
            )
        });

        Self {
            state,
            cancel,
            broker_task: None,
            pipeline_task,
            status_task,
        }
    }

    pub fn state(&self) -> HubState {
        self.state.clone()
    }

    pub async fn shutdown(self) {
        let HubHandle {
            state,
            cancel,
            broker_task,
            pipeline_task,
            status_task,
        } = self;

        info!("Shutting down telemetry hub");
        cancel.cancel();

        if let Some(task) = broker_task {
            if let Err(e) = task.await {
                error!("Broker task ended abnormally: {}", e);
            }
        }
        if let Err(e) = pipeline_task.await {
            error!("Pipeline task ended abnormally: {}", e);
        }
        state.close_subscribers().await;

        if let Some(task) = status_task {
            if let Err(e) = task.await {
                error!("Status reporter ended abnormally: {}", e);
            }
        }
        info!("Telemetry hub stopped");
    }
}

/// Logs one status line every `interval` until `cancel` fires.
fn spawn_status_reporter(
    state: HubState,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let status = state.get_status().await;
                    info!(
                        broker_connected = status.broker_connected,
                        subscribers = status.subscriber_count,
                        total_messages = status.total_messages,
                        devices = status.connected_devices,
                        "Hub status"
                    );
                }
            }
        }
        debug!("Status reporter stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::test_support::RecordingLink;
    use serde_json::Value;

    #[tokio::test]
    async fn spawn_rejects_invalid_config() {
        let mut config = HubConfig::default();
        config.history.capacity = 0;

        let result = HubHandle::spawn(&config);
        assert!(matches!(result, Err(HubError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn shutdown_closes_subscribers() {
        let (_tx, rx) = mpsc::channel(4);
        let (_status_tx, status_rx) = watch::channel(ConnectionState::Connected);
        let hub = HubHandle::spawn_with_link(
            &HubConfig::default(),
            Arc::new(RecordingLink::default()),
            rx,
            status_rx,
        );

        let mut subscription = hub.state().connect_subscriber().await;
        let init: Value = serde_json::from_str(&subscription.recv().await.unwrap()).unwrap();
        assert_eq!(init["type"], "init");

        hub.shutdown().await;
        assert_eq!(subscription.recv().await, None);
    }
}
