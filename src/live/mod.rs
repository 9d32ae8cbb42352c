//! The resilient live-update channel
//!
//! One [`LiveClient`] owns one broker session, supervised by a single task:
//!
//! - [`backoff`] - reconnect delays and the attempt limit
//! - [`registry`] - desired subscriptions, replayed on every connect
//! - [`queue`] - bounded FIFO of publishes made while offline
//! - [`dispatcher`] - wildcard handler table for inbound messages
//! - [`state`] - connection states, snapshots and transition events
//! - [`health`] - health derived from a snapshot
//!
//! # Usage
//!
//! ```rust,no_run
//! use schoolbridge_live::config::{Credentials, LiveConfig};
//! use schoolbridge_live::live::LiveClient;
//! use schoolbridge_live::protocol::Qos;
//!
//! # tokio_test::block_on(async {
//! let config = LiveConfig::load_from_file("schoolbridge.toml".as_ref())?;
//! let client = LiveClient::from_config(&config, Some(Credentials::new("parent-42", "token")))?;
//!
//! let alerts = client
//!     .add_handler("school/+/alerts", |message| {
//!         println!("alert on {}", message.topic);
//!         Ok(())
//!     })
//!     .await?;
//! client.subscribe("school/42/#", Qos::AtLeastOnce).await?;
//! client.connect().await?;
//!
//! client.publish("school/42/receipts", "read", Qos::AtLeastOnce).await?;
//! alerts.remove();
//! client.disconnect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod backoff;
pub mod client;
pub mod dispatcher;
pub mod health;
pub mod queue;
pub mod registry;
pub mod state;
mod supervisor;

pub use backoff::{ReconnectPolicy, ReconnectionDecision};
pub use client::{HandlerRegistration, LiveClient, LiveSettings, PublishOutcome};
pub use dispatcher::{DispatchReport, Dispatcher, HandlerError, HandlerFn, HandlerId};
pub use health::{ConnectionQuality, HealthMetrics, HealthMonitor};
pub use queue::PublishQueue;
pub use registry::{Subscription, SubscriptionRegistry, Upsert};
pub use state::{ConnectionSnapshot, ConnectionState, StateEvent};
