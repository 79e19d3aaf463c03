use chrono::{Duration, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedRwLockWriteGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::broadcast::Broadcaster;
use crate::mqtt::RawMessage;
use crate::telemetry::{normalize, DeviceRegistry, NormalizedReading, TelemetryStore};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Ingest channel closed")]
    ChannelClosed,
}

// One message at a time: Waiting -> Normalized -> Recorded -> Waiting
pub trait IngestState: fmt::Debug {}

#[derive(Debug)]
pub struct Waiting;

#[derive(Debug)]
pub struct Normalized(NormalizedReading);

/// Store and registry are updated and both write guards stay held until the
/// reading has been broadcast. Readers therefore see a reading either
/// everywhere or nowhere.
#[derive(Debug)]
pub struct Recorded {
    reading: NormalizedReading,
    store: OwnedRwLockWriteGuard<TelemetryStore>,
    registry: OwnedRwLockWriteGuard<DeviceRegistry>,
}

impl IngestState for Waiting {}
impl IngestState for Normalized {}
impl IngestState for Recorded {}

impl Normalized {
    pub fn reading(&self) -> &NormalizedReading {
        &self.0
    }
}

impl Recorded {
    pub fn reading(&self) -> &NormalizedReading {
        &self.reading
    }
}

#[derive(Debug)]
struct IngestContext {
    // Raw messages from the broker client, in arrival order
    messages: mpsc::Receiver<RawMessage>,

    // Single writer of both structures
    store: Arc<RwLock<TelemetryStore>>,
    registry: Arc<RwLock<DeviceRegistry>>,

    broadcaster: Arc<Broadcaster>,
}

#[derive(Debug)]
pub struct IngestPipeline<S: IngestState> {
    context: IngestContext,
    state: S,
}

impl<S: IngestState> IngestPipeline<S> {
    pub fn state(&self) -> &S {
        &self.state
    }
}

impl IngestPipeline<Waiting> {
    pub fn create(
        messages: mpsc::Receiver<RawMessage>,
        store: Arc<RwLock<TelemetryStore>>,
        registry: Arc<RwLock<DeviceRegistry>>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        debug!("Creating ingestion pipeline");
        Self {
            context: IngestContext {
                messages,
                store,
                registry,
                broadcaster,
            },
            state: Waiting,
        }
    }

    // Wait for the next raw message and normalize it
    pub async fn receive(mut self) -> Result<IngestPipeline<Normalized>, PipelineError> {
        let message = self
            .context
            .messages
            .recv()
            .await
            .ok_or(PipelineError::ChannelClosed)?;
        trace!("Normalizing {}", message);

        Ok(IngestPipeline {
            context: self.context,
            state: Normalized(normalize(&message)),
        })
    }
}

impl IngestPipeline<Normalized> {
    /// Applies the reading to the store and the registry.
    ///
    /// Guards are taken store first, then registry; every reader that needs
    /// both takes them in the same order.
    pub async fn record(self) -> IngestPipeline<Recorded> {
        let IngestPipeline {
            context,
            state: Normalized(reading),
        } = self;

        let mut store = context.store.clone().write_owned().await;
        let mut registry = context.registry.clone().write_owned().await;

        let category = store.ingest(reading.clone());
        let device_messages = registry.record(&reading);

        debug!(
            topic = %reading.topic,
            category = ?category,
            device_messages = ?device_messages,
            "Reading recorded"
        );

        IngestPipeline {
            context,
            state: Recorded {
                reading,
                store,
                registry,
            },
        }
    }
}

impl IngestPipeline<Recorded> {
    // Fan out, then release both write guards
    pub async fn broadcast(self) -> IngestPipeline<Waiting> {
        let IngestPipeline { context, state } = self;

        let delivered = context.broadcaster.publish(&state.reading).await;
        trace!(delivered, "Update broadcast");
        drop(state);

        IngestPipeline {
            context,
            state: Waiting,
        }
    }
}

/// Drives the pipeline until the ingest channel closes or `cancel` fires.
pub async fn run_pipeline_loop(
    mut pipeline: IngestPipeline<Waiting>,
    cancel: CancellationToken,
) -> Result<(), PipelineError> {
    info!("Starting ingestion pipeline");

    let mut processed: u64 = 0;
    let mut window: u64 = 0;
    let mut last_stats_time = Utc::now();
    let stats_interval = Duration::seconds(30);

    loop {
        let normalized = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(processed, "Ingestion pipeline cancelled");
                return Ok(());
            }
            received = pipeline.receive() => match received {
                Ok(normalized) => normalized,
                Err(PipelineError::ChannelClosed) => {
                    info!(processed, "Ingest channel closed, pipeline finished");
                    return Ok(());
                }
            },
        };

        pipeline = normalized.record().await.broadcast().await;
        processed += 1;
        window += 1;

        let now = Utc::now();
        if now - last_stats_time > stats_interval {
            let elapsed = (now - last_stats_time).num_seconds().max(1);
            info!(
                "Pipeline stats: {} readings in {} seconds ({:.2}/sec), {} total",
                window,
                elapsed,
                window as f64 / elapsed as f64,
                processed
            );
            window = 0;
            last_stats_time = now;
        }
    }
}
