//! In-memory transport for exercising the live client without a broker
//!
//! [`MockTransport::new`] returns the transport together with a
//! [`MockBroker`] that drives it: scripting connect results, injecting
//! inbound messages, dropping the connection, failing publishes, and
//! recording everything the client sent.

use crate::error::LinkError;
use crate::protocol::{InboundMessage, OutboundMessage, Qos};
use crate::transport::{LinkEvent, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct MockState {
    connect_script: VecDeque<Result<(), LinkError>>,
    connect_delay: Option<Duration>,
    connect_attempts: u32,
    connected: bool,
    subscribes: Vec<(String, Qos)>,
    unsubscribes: Vec<String>,
    published: Vec<OutboundMessage>,
    /// Publishes still accepted before the next one fails
    publish_budget: Option<usize>,
    disconnects: u32,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock transport recording every operation
#[derive(Debug)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    inbound: mpsc::UnboundedReceiver<Result<LinkEvent, LinkError>>,
}

/// Test-side control of a [`MockTransport`]
#[derive(Debug, Clone)]
pub struct MockBroker {
    state: Arc<Mutex<MockState>>,
    inbound: mpsc::UnboundedSender<Result<LinkEvent, LinkError>>,
}

impl MockTransport {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (MockTransport, MockBroker) {
        let state = Arc::new(Mutex::new(MockState::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        (
            MockTransport {
                state: Arc::clone(&state),
                inbound: rx,
            },
            MockBroker { state, inbound: tx },
        )
    }

    fn not_connected() -> LinkError {
        LinkError::transport("mock transport is not connected")
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<(), LinkError> {
        let delay = {
            let mut state = lock(&self.state);
            state.connect_attempts += 1;
            state.connected = false;
            state.connect_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        // A new session never sees events queued for the previous one
        while self.inbound.try_recv().is_ok() {}

        let mut state = lock(&self.state);
        let result = state.connect_script.pop_front().unwrap_or(Ok(()));
        state.connected = result.is_ok();
        result
    }

    async fn subscribe(&mut self, filter: &str, qos: Qos) -> Result<(), LinkError> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(Self::not_connected());
        }
        state.subscribes.push((filter.to_string(), qos));
        Ok(())
    }

    async fn unsubscribe(&mut self, filter: &str) -> Result<(), LinkError> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(Self::not_connected());
        }
        state.unsubscribes.push(filter.to_string());
        Ok(())
    }

    async fn publish(&mut self, message: &OutboundMessage) -> Result<(), LinkError> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(Self::not_connected());
        }
        match state.publish_budget {
            Some(0) => {
                state.publish_budget = None;
                state.connected = false;
                Err(LinkError::transport("connection reset during publish"))
            }
            Some(remaining) => {
                state.publish_budget = Some(remaining - 1);
                state.published.push(message.clone());
                Ok(())
            }
            None => {
                state.published.push(message.clone());
                Ok(())
            }
        }
    }

    async fn poll(&mut self) -> Result<LinkEvent, LinkError> {
        match self.inbound.recv().await {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }

    async fn disconnect(&mut self) {
        let mut state = lock(&self.state);
        state.disconnects += 1;
        state.connected = false;
    }
}

impl MockBroker {
    /// Queue results for the next connect attempts; an empty script succeeds
    pub fn script_connects<I>(&self, results: I)
    where
        I: IntoIterator<Item = Result<(), LinkError>>,
    {
        lock(&self.state).connect_script.extend(results);
    }

    /// Make every connect attempt take `delay` before resolving
    pub fn set_connect_delay(&self, delay: Duration) {
        lock(&self.state).connect_delay = Some(delay);
    }

    /// Accept `count` more publishes, then fail the next one and drop the session
    pub fn fail_publishes_after(&self, count: usize) {
        lock(&self.state).publish_budget = Some(count);
    }

    pub fn deliver(&self, topic: &str, payload: impl Into<Bytes>) {
        let message = InboundMessage::new(topic, payload);
        let _ = self.inbound.send(Ok(LinkEvent::Message(message)));
    }

    /// Surface an error from the next poll, e.g. a protocol violation
    pub fn inject_error(&self, error: LinkError) {
        let _ = self.inbound.send(Err(error));
    }

    /// Simulate the broker closing the session
    pub fn drop_connection(&self, reason: &str) {
        lock(&self.state).connected = false;
        let _ = self
            .inbound
            .send(Ok(LinkEvent::Disconnected(reason.to_string())));
    }

    pub fn connect_attempts(&self) -> u32 {
        lock(&self.state).connect_attempts
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    pub fn subscribes(&self) -> Vec<(String, Qos)> {
        lock(&self.state).subscribes.clone()
    }

    /// How many times `filter` was sent to the broker
    pub fn subscribe_count(&self, filter: &str) -> usize {
        lock(&self.state)
            .subscribes
            .iter()
            .filter(|(sent, _)| sent == filter)
            .count()
    }

    pub fn unsubscribes(&self) -> Vec<String> {
        lock(&self.state).unsubscribes.clone()
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        lock(&self.state).published.clone()
    }

    /// Published payloads decoded as UTF-8, in send order
    pub fn published_payloads(&self) -> Vec<String> {
        lock(&self.state)
            .published
            .iter()
            .map(|message| String::from_utf8_lossy(&message.payload).into_owned())
            .collect()
    }

    pub fn disconnects(&self) -> u32 {
        lock(&self.state).disconnects
    }
}
