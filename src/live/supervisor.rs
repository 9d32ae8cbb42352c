//! The single task that owns the connection and all client state
//!
//! Handles talk to the supervisor over an unbounded command channel and get
//! replies on oneshot channels. The supervisor alternates between four
//! phases:
//!
//! - `Idle`: not connected and not trying, waits for commands
//! - `Connecting`: one connection attempt, bounded by the connect timeout
//! - `Backoff`: waits out a reconnect delay, still serving commands
//! - `Online`: races commands against inbound transport events
//!
//! When every handle is dropped the command channel closes and the
//! supervisor closes the session and exits.

use super::backoff::{ReconnectPolicy, ReconnectionDecision};
use super::client::PublishOutcome;
use super::dispatcher::{Dispatcher, HandlerFn, HandlerId};
use super::queue::PublishQueue;
use super::registry::SubscriptionRegistry;
use super::state::{log_state_transition, ConnectionSnapshot, ConnectionState, StateEvent};
use crate::dispatch_span;
use crate::error::{LinkError, LiveError, LiveResult};
use crate::observability::LiveMetrics;
use crate::protocol::{validate_topic_filter, validate_topic_name, OutboundMessage, Qos};
use crate::transport::{LinkEvent, Transport};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Requests sent from handles to the supervisor
pub(crate) enum Command {
    Connect {
        reply: oneshot::Sender<LiveResult<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Subscribe {
        filter: String,
        qos: Qos,
        reply: oneshot::Sender<LiveResult<()>>,
    },
    Unsubscribe {
        filter: String,
        reply: oneshot::Sender<LiveResult<bool>>,
    },
    Publish {
        message: OutboundMessage,
        reply: oneshot::Sender<LiveResult<PublishOutcome>>,
    },
    AddHandler {
        filter: String,
        handler: HandlerFn,
        reply: oneshot::Sender<HandlerId>,
    },
    RemoveHandler {
        id: HandlerId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Connecting,
    Backoff(tokio::time::Instant),
    Online,
}

enum AttemptOutcome {
    Finished(Result<(), LinkError>),
    Cancelled(oneshot::Sender<()>),
}

/// Channels and shared state the supervisor publishes to
pub(crate) struct SupervisorChannels {
    pub commands: mpsc::UnboundedReceiver<Command>,
    pub status: watch::Sender<ConnectionSnapshot>,
    pub events: broadcast::Sender<StateEvent>,
    pub metrics: Arc<LiveMetrics>,
}

pub(crate) struct Supervisor<T: Transport> {
    transport: T,
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<ConnectionSnapshot>,
    events: broadcast::Sender<StateEvent>,
    metrics: Arc<LiveMetrics>,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    registry: SubscriptionRegistry,
    queue: PublishQueue,
    dispatcher: Dispatcher,
    phase: Phase,
    pending_connects: Vec<oneshot::Sender<LiveResult<()>>>,
    /// Connection attempts since the last success
    attempts: u32,
    /// Consecutive failures, a lost connection included
    failures: u32,
    ever_connected: bool,
}

impl<T: Transport> Supervisor<T> {
    pub(crate) fn new(
        transport: T,
        channels: SupervisorChannels,
        policy: ReconnectPolicy,
        connect_timeout: Duration,
        queue_capacity: usize,
        registry: SubscriptionRegistry,
    ) -> Self {
        Self {
            transport,
            commands: channels.commands,
            status: channels.status,
            events: channels.events,
            metrics: channels.metrics,
            policy,
            connect_timeout,
            registry,
            queue: PublishQueue::new(queue_capacity),
            dispatcher: Dispatcher::new(),
            phase: Phase::Idle,
            pending_connects: Vec::new(),
            attempts: 0,
            failures: 0,
            ever_connected: false,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!("Connection supervisor started");
        loop {
            let keep_running = match self.phase {
                Phase::Idle => self.idle().await,
                Phase::Connecting => self.attempt_connect().await,
                Phase::Backoff(until) => self.backoff(until).await,
                Phase::Online => self.online().await,
            };
            if !keep_running {
                break;
            }
        }

        info!("All client handles dropped, closing connection");
        self.close().await;
    }

    async fn idle(&mut self) -> bool {
        match self.commands.recv().await {
            Some(command) => {
                self.handle_command(command).await;
                true
            }
            None => false,
        }
    }

    async fn backoff(&mut self, until: tokio::time::Instant) -> bool {
        tokio::select! {
            _ = tokio::time::sleep_until(until) => {
                self.phase = Phase::Connecting;
                true
            }
            command = self.commands.recv() => match command {
                Some(command) => {
                    self.handle_command(command).await;
                    true
                }
                None => false,
            },
        }
    }

    /// Commands win over inbound events, so a handler change is in effect
    /// for every message the transport yields after it
    async fn online(&mut self) -> bool {
        tokio::select! {
            biased;
            command = self.commands.recv() => match command {
                Some(command) => {
                    self.handle_command(command).await;
                    true
                }
                None => false,
            },
            event = self.transport.poll() => {
                self.on_link_event(event).await;
                true
            }
        }
    }

    /// One connection attempt; commands arriving meanwhile are deferred,
    /// except `Disconnect`, which abandons the attempt
    async fn attempt_connect(&mut self) -> bool {
        self.attempts += 1;
        self.metrics.connection_attempt();
        self.transition(ConnectionState::Connecting, None);
        debug!(attempt = self.attempts, "Connecting to broker");

        let timeout = self.connect_timeout;
        let mut deferred = Vec::new();
        let mut handles_gone = false;

        let outcome = {
            let connect = tokio::time::timeout(timeout, self.transport.connect());
            tokio::pin!(connect);
            loop {
                tokio::select! {
                    result = &mut connect => {
                        break AttemptOutcome::Finished(result.unwrap_or_else(|_| {
                            Err(LinkError::transport(format!(
                                "connection attempt timed out after {timeout:?}"
                            )))
                        }));
                    }
                    command = self.commands.recv(), if !handles_gone => match command {
                        Some(Command::Disconnect { reply }) => break AttemptOutcome::Cancelled(reply),
                        Some(command) => deferred.push(command),
                        None => handles_gone = true,
                    },
                }
            }
        };

        match outcome {
            AttemptOutcome::Finished(Ok(())) => self.on_connected().await,
            AttemptOutcome::Finished(Err(e)) => self.on_link_failure(e),
            AttemptOutcome::Cancelled(reply) => {
                info!("Connection attempt abandoned by disconnect");
                self.close().await;
                let _ = reply.send(());
            }
        }

        for command in deferred {
            self.handle_command(command).await;
        }
        !handles_gone
    }

    async fn on_connected(&mut self) {
        let reconnect = self.ever_connected;
        self.ever_connected = true;
        self.attempts = 0;
        self.failures = 0;
        self.metrics.connection_established(reconnect);

        let desired: Vec<(String, Qos)> = self
            .registry
            .iter()
            .map(|subscription| (subscription.filter.clone(), subscription.qos))
            .collect();
        for (filter, qos) in &desired {
            if let Err(e) = self.transport.subscribe(filter, *qos).await {
                warn!(%filter, error = %e, "Subscription replay failed");
                self.on_link_failure(e);
                return;
            }
        }
        self.metrics.subscriptions_replayed(desired.len());
        if !desired.is_empty() {
            debug!(count = desired.len(), "Subscriptions replayed");
        }

        self.phase = Phase::Online;
        self.status.send_modify(|snapshot| {
            snapshot.connected_since = Some(Instant::now());
            if reconnect {
                snapshot.reconnects += 1;
            }
        });
        self.transition(ConnectionState::Connected, None);
        for reply in self.pending_connects.drain(..) {
            let _ = reply.send(Ok(()));
        }

        if !self.queue.is_empty() {
            info!(queued = self.queue.len(), "Flushing queued publishes");
        }
        if let Err(e) = self.flush_queue().await {
            self.on_link_failure(e);
        }
    }

    /// Classify a failed attempt or a lost session and pick the next phase
    fn on_link_failure(&mut self, error: LinkError) {
        let was_online = self.phase == Phase::Online;

        if !error.is_retryable() {
            self.metrics.auth_failed();
            self.phase = Phase::Idle;
            self.attempts = 0;
            self.failures = 0;
            self.transition(ConnectionState::Disconnected, Some(error.clone()));
            for reply in self.pending_connects.drain(..) {
                let _ = reply.send(Err(LiveError::Link(error.clone())));
            }
            return;
        }

        if was_online {
            self.metrics.connection_lost();
        } else {
            self.metrics.connection_failed();
        }
        self.failures += 1;

        let decision = self
            .policy
            .decide(self.attempts, self.failures, &mut rand::thread_rng());
        match decision {
            ReconnectionDecision::Proceed { attempt, delay } => {
                self.transition(ConnectionState::Reconnecting, Some(error));
                info!(
                    attempt,
                    max_attempts = ?self.policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnect scheduled"
                );
                self.phase = Phase::Backoff(tokio::time::Instant::now() + delay);
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                let attempts = self.attempts;
                self.phase = Phase::Idle;
                self.attempts = 0;
                self.failures = 0;
                self.transition(ConnectionState::Disconnected, Some(error.clone()));
                for reply in self.pending_connects.drain(..) {
                    let _ = reply.send(Err(LiveError::AttemptsExhausted {
                        attempts,
                        last_error: error.clone(),
                    }));
                }
            }
        }
    }

    async fn on_link_event(&mut self, event: Result<LinkEvent, LinkError>) {
        match event {
            Ok(LinkEvent::Message(message)) => {
                self.metrics.message_received();
                self.status
                    .send_modify(|snapshot| snapshot.last_message_at = Some(Instant::now()));

                let report = {
                    let _span = dispatch_span!(topic = %message.topic).entered();
                    self.dispatcher.dispatch(&message)
                };
                self.metrics
                    .message_dispatched(report.delivered, report.failed);
            }
            Ok(LinkEvent::Disconnected(reason)) => {
                self.on_link_failure(LinkError::transport(reason));
            }
            Err(e) if e.is_protocol() => {
                self.metrics.protocol_error();
                warn!(error = %e, "Dropped malformed inbound frame");
            }
            Err(e) => self.on_link_failure(e),
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => match self.phase {
                Phase::Online => {
                    let _ = reply.send(Ok(()));
                }
                Phase::Connecting | Phase::Backoff(_) => self.pending_connects.push(reply),
                Phase::Idle => {
                    self.pending_connects.push(reply);
                    self.attempts = 0;
                    self.failures = 0;
                    self.phase = Phase::Connecting;
                }
            },
            Command::Disconnect { reply } => {
                self.close().await;
                let _ = reply.send(());
            }
            Command::Subscribe { filter, qos, reply } => {
                let result = self.subscribe(filter, qos).await;
                let _ = reply.send(result);
            }
            Command::Unsubscribe { filter, reply } => {
                let result = self.unsubscribe(filter).await;
                let _ = reply.send(result);
            }
            Command::Publish { message, reply } => {
                let result = self.publish(message).await;
                let _ = reply.send(result);
            }
            Command::AddHandler {
                filter,
                handler,
                reply,
            } => {
                let id = self.dispatcher.register(filter.as_str(), handler);
                debug!(handler = %id, %filter, "Handler registered");
                let _ = reply.send(id);
            }
            Command::RemoveHandler { id } => {
                if self.dispatcher.deregister(id) {
                    debug!(handler = %id, "Handler removed");
                }
            }
        }
    }

    async fn subscribe(&mut self, filter: String, qos: Qos) -> LiveResult<()> {
        validate_topic_filter(&filter)?;
        let change = self.registry.upsert(&filter, qos);

        if change.needs_send() && self.phase == Phase::Online {
            if let Err(e) = self.transport.subscribe(&filter, qos).await {
                // Stays registered and is replayed after the reconnect
                self.on_link_failure(e);
            }
        }
        Ok(())
    }

    async fn unsubscribe(&mut self, filter: String) -> LiveResult<bool> {
        if !self.registry.remove(&filter) {
            return Ok(false);
        }

        if self.phase == Phase::Online {
            if let Err(e) = self.transport.unsubscribe(&filter).await {
                self.on_link_failure(e);
            }
        }
        Ok(true)
    }

    async fn publish(&mut self, message: OutboundMessage) -> LiveResult<PublishOutcome> {
        validate_topic_name(&message.topic)?;

        if let Some(evicted) = self.queue.push(message) {
            self.metrics.message_dropped();
            let overflow = LiveError::Capacity {
                capacity: self.queue.capacity(),
            };
            warn!(
                error = %overflow,
                evicted_topic = %evicted.topic,
                dropped_total = self.queue.dropped(),
                "Publish queue overflow"
            );
        }

        if self.phase == Phase::Online {
            if let Err(e) = self.flush_queue().await {
                self.on_link_failure(e);
            }
        }

        if self.queue.is_empty() {
            Ok(PublishOutcome::Sent)
        } else {
            self.metrics.message_queued();
            self.metrics.set_queue_depth(self.queue.len());
            Ok(PublishOutcome::Queued {
                depth: self.queue.len(),
            })
        }
    }

    /// Send queued messages oldest first; a message leaves the queue only
    /// once the transport accepted it
    async fn flush_queue(&mut self) -> Result<(), LinkError> {
        while let Some(message) = self.queue.front() {
            match self.transport.publish(message).await {
                Ok(()) => {
                    self.queue.pop_front();
                    self.metrics.message_published();
                }
                Err(e) => {
                    self.metrics.publish_failed();
                    self.metrics.set_queue_depth(self.queue.len());
                    return Err(e);
                }
            }
        }
        self.metrics.set_queue_depth(0);
        Ok(())
    }

    /// Graceful close: queued messages stay queued, pending connects fail
    async fn close(&mut self) {
        if matches!(self.phase, Phase::Online | Phase::Connecting) {
            self.transport.disconnect().await;
        }
        if self.phase == Phase::Online {
            self.metrics.connection_closed();
        }
        self.phase = Phase::Idle;
        self.attempts = 0;
        self.failures = 0;
        self.transition(ConnectionState::Closed, None);
        for reply in self.pending_connects.drain(..) {
            let _ = reply.send(Err(LiveError::Closed));
        }
    }

    fn transition(&mut self, to: ConnectionState, error: Option<LinkError>) {
        let from = self.status.borrow().state;
        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            warn!(%from, %to, "Unexpected connection state transition");
        }
        log_state_transition(from, to, error.as_ref());

        let attempt = self.attempts;
        self.status.send_modify(|snapshot| {
            snapshot.state = to;
            snapshot.attempt = attempt;
            match (&error, to) {
                (Some(e), _) => snapshot.last_error = Some(e.clone()),
                (None, ConnectionState::Connected) => snapshot.last_error = None,
                (None, _) => {}
            }
            if to != ConnectionState::Connected {
                snapshot.connected_since = None;
            }
        });

        // No receivers is fine
        let _ = self.events.send(StateEvent {
            from,
            to,
            error,
            at: Utc::now(),
        });
    }
}
