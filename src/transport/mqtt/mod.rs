//! MQTT v5 transport built on rumqttc
//!
//! The module separates pure functions from I/O:
//!
//! - [`connection`] - option building and error classification
//! - [`message_handler`] - routing of rumqttc events
//! - [`client`] - the session driver and the [`crate::transport::Transport`] impl
//!
//! # Usage
//!
//! ```rust,no_run
//! use schoolbridge_live::config::{Credentials, LiveConfig};
//! use schoolbridge_live::transport::{MqttTransport, Transport};
//!
//! # tokio_test::block_on(async {
//! let config = LiveConfig::load_from_file("schoolbridge.toml".as_ref())?;
//! let credentials = Credentials::new("parent-42", "session-token");
//! let mut transport = MqttTransport::new("parent-app-1", &config.mqtt, Some(&credentials))?;
//! transport.connect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttTransport;
pub use connection::{classify_connection_error, configure_mqtt_options};
pub use message_handler::{EventRoute, MessageHandler};
