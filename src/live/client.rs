//! The public handle to the live-update channel
//!
//! A [`LiveClient`] is cheap to clone. All clones talk to the same
//! supervisor task, which owns the transport, the subscription registry, the
//! publish queue and the handler table. The supervisor shuts down when the
//! last clone is dropped.

use super::backoff::ReconnectPolicy;
use super::dispatcher::{channel_handler, HandlerError, HandlerFn, HandlerId};
use super::health::{ConnectionQuality, HealthMetrics, HealthMonitor};
use super::registry::SubscriptionRegistry;
use super::state::{ConnectionSnapshot, ConnectionState, StateEvent};
use super::supervisor::{Command, Supervisor, SupervisorChannels};
use crate::config::{ConfigError, Credentials, LiveConfig};
use crate::connection_span;
use crate::error::{LiveError, LiveResult};
use crate::observability::{LiveMetrics, MetricsSnapshot};
use crate::protocol::{
    validate_topic_filter, validate_topic_name, InboundMessage, OutboundMessage, Qos,
};
use crate::transport::{MqttTransport, Transport};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

const STATE_EVENT_CAPACITY: usize = 64;

/// What happened to a published message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Accepted by the transport
    Sent,
    /// Held in the publish queue until the next connection; `depth` counts it
    Queued { depth: usize },
}

/// Settings for one client, independent of how they were loaded
#[derive(Debug, Clone)]
pub struct LiveSettings {
    pub client_id: String,
    /// Broker address, for snapshots and logs
    pub broker: String,
    pub policy: ReconnectPolicy,
    pub queue_capacity: usize,
    pub connect_timeout: Duration,
    /// Registered before the first connect, in this order
    pub initial_subscriptions: Vec<(String, Qos)>,
}

impl LiveSettings {
    pub fn new(client_id: impl Into<String>, broker: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            broker: broker.into(),
            policy: ReconnectPolicy::default(),
            queue_capacity: 1_000,
            connect_timeout: Duration::from_secs(10),
            initial_subscriptions: Vec::new(),
        }
    }

    pub fn from_config(config: &LiveConfig, client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            broker: config.mqtt.broker_url.clone(),
            policy: config.reconnect.to_policy(),
            queue_capacity: config.queue.capacity,
            connect_timeout: config.mqtt.connect_timeout(),
            initial_subscriptions: config
                .subscriptions
                .iter()
                .map(|entry| (entry.filter.clone(), entry.qos))
                .collect(),
        }
    }
}

/// Handle to a running live-update channel
#[derive(Clone)]
pub struct LiveClient {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionSnapshot>,
    events: broadcast::Sender<StateEvent>,
    metrics: Arc<LiveMetrics>,
    connect_timeout: Duration,
}

impl std::fmt::Debug for LiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.status.borrow();
        f.debug_struct("LiveClient")
            .field("client_id", &snapshot.client_id)
            .field("state", &snapshot.state)
            .finish()
    }
}

impl LiveClient {
    /// Start the supervisor for `transport`; nothing connects until [`connect`](Self::connect)
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<T: Transport>(transport: T, settings: LiveSettings) -> LiveResult<Self> {
        settings
            .policy
            .validate()
            .map_err(|e| LiveError::Config(ConfigError::InvalidConfig(e)))?;

        let mut registry = SubscriptionRegistry::new();
        for (filter, qos) in &settings.initial_subscriptions {
            validate_topic_filter(filter)?;
            registry.upsert(filter, *qos);
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionSnapshot::new(
            settings.broker.as_str(),
            settings.client_id.as_str(),
        ));
        let (events_tx, _) = broadcast::channel(STATE_EVENT_CAPACITY);
        let metrics = Arc::new(LiveMetrics::new());

        let supervisor = Supervisor::new(
            transport,
            SupervisorChannels {
                commands: command_rx,
                status: status_tx,
                events: events_tx.clone(),
                metrics: Arc::clone(&metrics),
            },
            settings.policy,
            settings.connect_timeout,
            settings.queue_capacity,
            registry,
        );

        let span = connection_span!(client_id = %settings.client_id, broker = %settings.broker);
        tokio::spawn(supervisor.run().instrument(span));

        Ok(Self {
            commands: command_tx,
            status: status_rx,
            events: events_tx,
            metrics,
            connect_timeout: settings.connect_timeout,
        })
    }

    /// Build an MQTT-backed client from configuration
    ///
    /// The configured client id gets a random suffix so two app instances
    /// never steal each other's broker session.
    pub fn from_config(config: &LiveConfig, credentials: Option<Credentials>) -> LiveResult<Self> {
        config.validate()?;
        let suffix = Uuid::new_v4().simple().to_string();
        let client_id = format!("{}-{}", config.client.id, &suffix[..8]);

        let transport = MqttTransport::new(&client_id, &config.mqtt, credentials.as_ref())?;
        info!(client_id = %client_id, broker = %config.mqtt.broker_url, "Live client created");
        Self::spawn(transport, LiveSettings::from_config(config, client_id))
    }

    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> LiveResult<R> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .map_err(|_| LiveError::Closed)?;
        rx.await.map_err(|_| LiveError::Closed)
    }

    /// Connect and wait until the session is established
    ///
    /// Retryable failures are retried with backoff behind the scenes. Returns
    /// early with an auth error, with `AttemptsExhausted` once the policy
    /// gives up, or with `ConnectTimeout` if no session is up within the
    /// connect timeout; in that last case retries keep going.
    pub async fn connect(&self) -> LiveResult<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect { reply: tx })
            .map_err(|_| LiveError::Closed)?;

        match tokio::time::timeout(self.connect_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LiveError::Closed),
            Err(_) => Err(LiveError::ConnectTimeout(self.connect_timeout)),
        }
    }

    /// Close the session and stop reconnecting; queued messages are kept
    pub async fn disconnect(&self) -> LiveResult<()> {
        match self.request(|reply| Command::Disconnect { reply }).await {
            Ok(()) | Err(LiveError::Closed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Register a subscription; it is sent now if connected and replayed on every reconnect
    pub async fn subscribe(&self, filter: &str, qos: Qos) -> LiveResult<()> {
        validate_topic_filter(filter)?;
        self.request(|reply| Command::Subscribe {
            filter: filter.to_string(),
            qos,
            reply,
        })
        .await?
    }

    /// Remove a subscription; returns false if it was not registered
    pub async fn unsubscribe(&self, filter: &str) -> LiveResult<bool> {
        self.request(|reply| Command::Unsubscribe {
            filter: filter.to_string(),
            reply,
        })
        .await?
    }

    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: Qos,
    ) -> LiveResult<PublishOutcome> {
        self.publish_message(OutboundMessage::new(topic, payload, qos))
            .await
    }

    /// Publish a prepared message, e.g. one with the retain flag set
    pub async fn publish_message(&self, message: OutboundMessage) -> LiveResult<PublishOutcome> {
        validate_topic_name(&message.topic)?;
        self.request(|reply| Command::Publish { message, reply })
            .await?
    }

    pub async fn publish_json<T: Serialize>(
        &self,
        topic: &str,
        value: &T,
        qos: Qos,
    ) -> LiveResult<PublishOutcome> {
        let payload = serde_json::to_vec(value)?;
        self.publish(topic, payload, qos).await
    }

    /// Route messages matching `filter` to `handler`
    ///
    /// The handler runs on the supervisor task and must not block. It stays
    /// registered until the returned registration is dropped or removed.
    pub async fn add_handler<F>(&self, filter: &str, handler: F) -> LiveResult<HandlerRegistration>
    where
        F: Fn(&InboundMessage) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.register(filter, Arc::new(handler)).await
    }

    /// Route messages matching `filter` into a bounded channel
    ///
    /// When the receiver falls behind, messages for it are dropped and counted
    /// as handler failures.
    pub async fn handler_channel(
        &self,
        filter: &str,
        capacity: usize,
    ) -> LiveResult<(HandlerRegistration, mpsc::Receiver<InboundMessage>)> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let registration = self.register(filter, channel_handler(tx)).await?;
        Ok((registration, rx))
    }

    async fn register(&self, filter: &str, handler: HandlerFn) -> LiveResult<HandlerRegistration> {
        validate_topic_filter(filter)?;
        let id = self
            .request(|reply| Command::AddHandler {
                filter: filter.to_string(),
                handler,
                reply,
            })
            .await?;

        Ok(HandlerRegistration {
            id,
            commands: self.commands.downgrade(),
            active: true,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.status.borrow().clone()
    }

    /// Watch connection snapshots; the receiver always sees the latest one
    pub fn watch_state(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.status.clone()
    }

    /// Every state transition, in order
    ///
    /// Slow receivers lag and skip events rather than block the client.
    pub fn events(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    /// Wait until the connection reaches `state`
    pub async fn wait_for_state(&self, state: ConnectionState) -> LiveResult<()> {
        let mut status = self.status.clone();
        status
            .wait_for(|snapshot| snapshot.state == state)
            .await
            .map(|_| ())
            .map_err(|_| LiveError::Closed)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn health(&self) -> HealthMetrics {
        HealthMonitor::calculate_health_metrics(&self.status.borrow(), Instant::now())
    }

    pub fn connection_quality(&self) -> ConnectionQuality {
        HealthMonitor::assess_connection_quality(&self.health())
    }
}

/// Keeps a handler registered; dropping it removes the handler
#[must_use = "dropping the registration removes the handler immediately"]
pub struct HandlerRegistration {
    id: HandlerId,
    commands: mpsc::WeakUnboundedSender<Command>,
    active: bool,
}

impl HandlerRegistration {
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Remove the handler now
    pub fn remove(mut self) {
        self.deregister();
    }

    /// Keep the handler for the lifetime of the client
    pub fn detach(mut self) -> HandlerId {
        self.active = false;
        self.id
    }

    fn deregister(&mut self) {
        if !std::mem::take(&mut self.active) {
            return;
        }
        if let Some(commands) = self.commands.upgrade() {
            if commands.send(Command::RemoveHandler { id: self.id }).is_err() {
                warn!(handler = %self.id, "Client closed before handler removal");
            }
        }
    }
}

impl Drop for HandlerRegistration {
    fn drop(&mut self) {
        self.deregister();
    }
}

impl std::fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkError;
    use crate::testing::MockTransport;

    fn fast_settings() -> LiveSettings {
        let mut settings = LiveSettings::new("parent-app-test", "mqtt://mock:1883");
        settings.policy = ReconnectPolicy {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            jitter: 0.0,
            max_attempts: None,
        };
        settings.connect_timeout = Duration::from_secs(2);
        settings
    }

    #[tokio::test]
    async fn test_connect_and_publish() {
        let (transport, broker) = MockTransport::new();
        let client = LiveClient::spawn(transport, fast_settings()).unwrap();

        assert_eq!(client.state(), ConnectionState::Disconnected);
        client.connect().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Connected);

        let outcome = client
            .publish("school/42/receipts", "read", Qos::AtLeastOnce)
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Sent);
        assert_eq!(broker.published_payloads(), vec!["read"]);
    }

    #[tokio::test]
    async fn test_publish_offline_is_queued() {
        let (transport, broker) = MockTransport::new();
        let client = LiveClient::spawn(transport, fast_settings()).unwrap();

        let first = client.publish("school/42/a", "1", Qos::AtMostOnce).await.unwrap();
        let second = client.publish("school/42/a", "2", Qos::AtMostOnce).await.unwrap();
        assert_eq!(first, PublishOutcome::Queued { depth: 1 });
        assert_eq!(second, PublishOutcome::Queued { depth: 2 });
        assert!(broker.published().is_empty());

        client.connect().await.unwrap();
        assert_eq!(broker.published_payloads(), vec!["1", "2"]);
        assert_eq!(client.metrics().outbound.queue_depth, 0);
    }

    #[tokio::test]
    async fn test_invalid_topics_rejected_before_supervisor() {
        let (transport, _broker) = MockTransport::new();
        let client = LiveClient::spawn(transport, fast_settings()).unwrap();

        assert!(matches!(
            client.publish("school/+/alerts", "x", Qos::AtMostOnce).await,
            Err(LiveError::InvalidTopic(_))
        ));
        assert!(matches!(
            client.subscribe("school/#/alerts", Qos::AtMostOnce).await,
            Err(LiveError::InvalidTopic(_))
        ));
        assert!(client.add_handler("", |_| Ok(())).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_policy_rejected() {
        let (transport, _broker) = MockTransport::new();
        let mut settings = fast_settings();
        settings.policy.jitter = 2.0;
        assert!(matches!(
            LiveClient::spawn(transport, settings),
            Err(LiveError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_auth_failure_is_terminal() {
        let (transport, broker) = MockTransport::new();
        broker.script_connects([Err(LinkError::auth("bad user name or password"))]);
        let client = LiveClient::spawn(transport, fast_settings()).unwrap();

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, LiveError::Link(LinkError::Auth(_))));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(broker.connect_attempts(), 1);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.metrics().connection.auth_failures, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_filter() {
        let (transport, broker) = MockTransport::new();
        let client = LiveClient::spawn(transport, fast_settings()).unwrap();
        client.connect().await.unwrap();

        assert!(!client.unsubscribe("school/1/#").await.unwrap());
        client.subscribe("school/1/#", Qos::AtLeastOnce).await.unwrap();
        assert!(client.unsubscribe("school/1/#").await.unwrap());
        assert_eq!(broker.unsubscribes(), vec!["school/1/#".to_string()]);
    }

    #[tokio::test]
    async fn test_health_follows_connection() {
        let (transport, _broker) = MockTransport::new();
        let client = LiveClient::spawn(transport, fast_settings()).unwrap();
        assert!(!client.health().is_healthy);
        assert_eq!(client.connection_quality(), ConnectionQuality::Critical);

        client.connect().await.unwrap();
        assert!(client.health().is_healthy);
        assert_eq!(client.connection_quality(), ConnectionQuality::Good);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (transport, _broker) = MockTransport::new();
        let client = LiveClient::spawn(transport, fast_settings()).unwrap();
        client.disconnect().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Closed);
        client.disconnect().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Closed);
    }
}
