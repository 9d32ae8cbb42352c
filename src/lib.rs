//! SchoolBridge live updates
//!
//! A resilient MQTT live-update channel for the SchoolBridge
//! school-management client: grade postings, attendance alerts, fee reminders
//! and announcements pushed to parent and staff apps.
//!
//! # Overview
//!
//! - Connection management with exponential backoff and jitter
//! - Subscriptions replayed in registration order on every reconnect
//! - Wildcard message dispatch with isolated handler failures
//! - A bounded publish queue that buffers while offline and drops the oldest
//!   message on overflow
//! - Structured logging and per-client metrics
//!
//! # Quick Start
//!
//! ```rust
//! use schoolbridge_live::live::{LiveClient, LiveSettings, PublishOutcome};
//! use schoolbridge_live::protocol::Qos;
//! use schoolbridge_live::testing::MockTransport;
//!
//! # tokio_test::block_on(async {
//! let (transport, broker) = MockTransport::new();
//! let client = LiveClient::spawn(transport, LiveSettings::new("parent-app-1", "mock")).unwrap();
//!
//! // Offline publishes are queued and flushed on connect
//! let outcome = client.publish("school/42/receipts", "read", Qos::AtLeastOnce).await.unwrap();
//! assert_eq!(outcome, PublishOutcome::Queued { depth: 1 });
//!
//! client.connect().await.unwrap();
//! assert_eq!(broker.published_payloads(), vec!["read"]);
//! # });
//! ```

pub mod config;
pub mod error;
pub mod live;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, Credentials, LiveConfig};
pub use error::{LinkError, LiveError, LiveResult};
pub use live::{
    ConnectionSnapshot, ConnectionState, HandlerError, HandlerRegistration, LiveClient,
    LiveSettings, PublishOutcome, StateEvent,
};
pub use protocol::{InboundMessage, OutboundMessage, Qos};
pub use transport::{LinkEvent, MqttTransport, Transport};
