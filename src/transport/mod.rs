//! Transport layer for the live-update channel
//!
//! A [`Transport`] is one broker session that can be opened, used and torn
//! down repeatedly. Reconnection, replay and queueing live above it in
//! [`crate::live`], which drives the transport from a single task.

use crate::error::LinkError;
use crate::protocol::{InboundMessage, OutboundMessage, Qos};

pub mod mqtt;

/// Something the broker session produced
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A publish arrived on a subscribed topic
    Message(InboundMessage),
    /// The session ended; the string is the reason reported by the stack
    Disconnected(String),
}

/// Transport trait for the live-update channel
///
/// This trait provides an abstraction over the broker connection to enable
/// dependency injection and testing.
#[async_trait::async_trait]
pub trait Transport: Send + 'static {
    /// Open a fresh session and wait until the broker acknowledges it
    ///
    /// Any previous session is discarded first.
    async fn connect(&mut self) -> Result<(), LinkError>;

    async fn subscribe(&mut self, filter: &str, qos: Qos) -> Result<(), LinkError>;

    async fn unsubscribe(&mut self, filter: &str) -> Result<(), LinkError>;

    /// Hand a message to the session; `Ok` means the transport accepted it
    async fn publish(&mut self, message: &OutboundMessage) -> Result<(), LinkError>;

    /// Wait for the next event from the open session
    ///
    /// Must be cancel-safe: it is raced against caller commands.
    async fn poll(&mut self) -> Result<LinkEvent, LinkError>;

    /// Close the session gracefully; a no-op when not connected
    async fn disconnect(&mut self);
}

pub use mqtt::MqttTransport;
