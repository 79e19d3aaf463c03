//! Broker client: connection lifecycle, resubscription and message delivery.
//!
//! Polling the rumqttc [`EventLoop`] and reacting to its events are kept apart.
//! [`BrokerClient::run`] owns the event loop and the reconnect timer, while
//! [`BrokerClient::handle_event`] only decides what an event means for the hub.
//! This keeps reconnect and resubscription behaviour testable without a broker.
//!
//! ```text
//! EventLoop::poll ──► handle_event ──┬─ ConnAck  ──► resubscribe all topics
//!                                    ├─ Publish  ──► RawMessage ──► ingest channel
//!                                    └─ Err      ──► Reconnecting, wait, poll again
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS,
    SubscribeReasonCode,
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::config::BrokerConfig;
use super::message_manager::RawMessage;

/// How long shutdown waits for the disconnect packet to be flushed
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        *self == ConnectionState::Connected
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Broker request rejected: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// Outbound half of the broker connection.
///
/// Both operations only enqueue a request and never wait for the broker,
/// so they are safe to call from the task that polls the event loop.
pub trait BrokerLink: fmt::Debug + Send + Sync {
    fn subscribe(&self, topic: &str) -> Result<(), BrokerError>;

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    fn disconnect(&self) -> Result<(), BrokerError>;
}

impl BrokerLink for AsyncClient {
    fn subscribe(&self, topic: &str) -> Result<(), BrokerError> {
        self.try_subscribe(topic, QoS::AtLeastOnce)?;
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        self.try_publish(topic, QoS::AtLeastOnce, false, payload)?;
        Ok(())
    }

    fn disconnect(&self) -> Result<(), BrokerError> {
        self.try_disconnect()?;
        Ok(())
    }
}

/// What the polling loop should do after an event has been handled
#[derive(Debug, PartialEq, Eq)]
pub enum EventOutcome {
    Continue,
    Backoff,
    Stop,
}

pub struct BrokerClient {
    link: Arc<dyn BrokerLink>,
    topics: Vec<String>,
    reconnect_interval: Duration,
    state_tx: watch::Sender<ConnectionState>,
    messages: mpsc::Sender<RawMessage>,
    // topics accepted for the current broker session
    subscribed: BTreeSet<String>,
    received: u64,
}

impl BrokerClient {
    /// Builds a rumqttc client for `config`. Nothing touches the network until
    /// the returned event loop is polled by [`BrokerClient::run`].
    pub fn connect(config: &BrokerConfig, messages: mpsc::Sender<RawMessage>) -> (Self, EventLoop) {
        let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options
            .set_keep_alive(config.keep_alive())
            .set_clean_session(true);
        if let Some((user, pass)) = config.credentials() {
            options.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(options, config.request_capacity);
        info!(
            host = %config.host,
            port = config.port,
            client_id = %config.client_id,
            "Created broker client"
        );

        (Self::with_link(Arc::new(client), config, messages), eventloop)
    }

    pub fn with_link(
        link: Arc<dyn BrokerLink>,
        config: &BrokerConfig,
        messages: mpsc::Sender<RawMessage>,
    ) -> Self {
        let mut topics: Vec<String> = Vec::with_capacity(config.topics.len());
        for topic in &config.topics {
            if !topics.contains(topic) {
                topics.push(topic.clone());
            }
        }

        let (state_tx, _) = watch::channel(ConnectionState::Connecting);

        Self {
            link,
            topics,
            reconnect_interval: config.reconnect_interval(),
            state_tx,
            messages,
            subscribed: BTreeSet::new(),
            received: 0,
        }
    }

    pub fn status(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn link(&self) -> Arc<dyn BrokerLink> {
        Arc::clone(&self.link)
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.subscribed.iter().cloned().collect()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("Broker connection state {:?} -> {:?}", previous, state);
        }
    }

    /// Requests a subscription for every configured topic.
    ///
    /// A rejected request is logged and skipped; the remaining topics are still
    /// requested. Returns the topics whose request was accepted.
    pub fn resubscribe(&mut self) -> Vec<String> {
        self.subscribed.clear();

        for topic in &self.topics {
            match self.link.subscribe(topic) {
                Ok(()) => {
                    info!(topic = %topic, "Subscribed to broker topic");
                    self.subscribed.insert(topic.clone());
                }
                Err(e) => {
                    error!(topic = %topic, error = %e, "Failed to subscribe to broker topic");
                }
            }
        }

        if self.subscribed.len() < self.topics.len() {
            warn!(
                subscribed = self.subscribed.len(),
                configured = self.topics.len(),
                "Running with partial subscription"
            );
        }

        self.subscribed_topics()
    }

    pub async fn handle_event(&mut self, event: Result<Event, ConnectionError>) -> EventOutcome {
        match event {
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                info!(
                    session_present = ack.session_present,
                    "Connected to broker"
                );
                self.set_state(ConnectionState::Connected);
                self.resubscribe();
                EventOutcome::Continue
            }
            Ok(Event::Incoming(Incoming::SubAck(ack))) => {
                let failures = ack
                    .return_codes
                    .iter()
                    .filter(|code| matches!(code, SubscribeReasonCode::Failure))
                    .count();
                if failures > 0 {
                    warn!(pkid = ack.pkid, failures, "Broker refused subscription");
                } else {
                    debug!(pkid = ack.pkid, "Subscription acknowledged");
                }
                EventOutcome::Continue
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                let message = RawMessage::from_publish(&publish);
                self.received += 1;
                trace!("Received {}", message);

                if self.messages.send(message).await.is_err() {
                    warn!("Ingest channel closed, stopping broker client");
                    return EventOutcome::Stop;
                }
                EventOutcome::Continue
            }
            Ok(Event::Incoming(packet)) => {
                trace!(?packet, "Broker packet");
                EventOutcome::Continue
            }
            Ok(Event::Outgoing(outgoing)) => {
                trace!(?outgoing, "Outgoing broker request");
                EventOutcome::Continue
            }
            Err(e) => {
                warn!(
                    error = %e,
                    retry_in_ms = self.reconnect_interval.as_millis() as u64,
                    received = self.received,
                    "Broker connection lost, reconnecting"
                );
                self.subscribed.clear();
                self.set_state(ConnectionState::Reconnecting);
                EventOutcome::Backoff
            }
        }
    }

    /// Polls the broker until `cancel` fires or the ingest channel closes.
    ///
    /// Reconnection is implicit: after a failed poll we wait the fixed
    /// interval and poll again, which makes rumqttc dial the broker anew.
    pub async fn run(mut self, mut eventloop: EventLoop, cancel: CancellationToken) {
        info!(topics = ?self.topics, "Starting broker client");

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = eventloop.poll() => event,
            };

            match self.handle_event(event).await {
                EventOutcome::Continue => {}
                EventOutcome::Backoff => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.reconnect_interval) => {}
                    }
                }
                EventOutcome::Stop => break,
            }
        }

        if self.state().is_connected() {
            match self.link.disconnect() {
                Ok(()) => flush_disconnect(&mut eventloop).await,
                Err(e) => warn!(error = %e, "Failed to request broker disconnect"),
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!(received = self.received, "Broker client stopped");
    }
}

async fn flush_disconnect(eventloop: &mut EventLoop) {
    let flushed = tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;

    if flushed.is_err() {
        warn!("Timed out flushing broker disconnect");
    }
}
