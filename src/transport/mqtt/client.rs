//! Impure I/O for the MQTT transport
//!
//! Each `connect()` builds a fresh rumqttc client/event-loop pair and spawns
//! a driver task that polls the event loop and forwards routed events over a
//! channel. The driver stops at the first connection error instead of letting
//! rumqttc reconnect on its own; reconnection is decided one layer up.
//!
//! The forwarding channel is unbounded: the driver must keep polling the
//! event loop while the owner of the transport is blocked in `publish` or
//! `subscribe`, since only polling drains the rumqttc request channel.

use super::connection::{classify_connection_error, configure_mqtt_options};
use super::message_handler::{to_mqtt_qos, EventRoute, MessageHandler};
use crate::config::{ConfigError, Credentials, MqttSection};
use crate::error::LinkError;
use crate::protocol::{OutboundMessage, Qos};
use crate::transport::{LinkEvent, Transport};
use async_trait::async_trait;
use rumqttc::v5::{AsyncClient, EventLoop, MqttOptions};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Capacity of the rumqttc request channel
const REQUEST_CAPACITY: usize = 64;

/// How long `disconnect()` lets the driver flush the DISCONNECT packet
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

type RouteResult = Result<EventRoute, LinkError>;

/// MQTT v5 transport over rumqttc
pub struct MqttTransport {
    options: MqttOptions,
    client: Option<AsyncClient>,
    events: Option<mpsc::UnboundedReceiver<RouteResult>>,
    driver: Option<JoinHandle<()>>,
}

impl MqttTransport {
    pub fn new(
        client_id: &str,
        config: &MqttSection,
        credentials: Option<&Credentials>,
    ) -> Result<Self, ConfigError> {
        let options = configure_mqtt_options(client_id, config, credentials)?;
        Ok(Self::from_options(options))
    }

    /// Use pre-built options, e.g. with a custom TLS configuration
    pub fn from_options(options: MqttOptions) -> Self {
        Self {
            options,
            client: None,
            events: None,
            driver: None,
        }
    }

    pub fn is_session_open(&self) -> bool {
        self.client.is_some()
    }

    fn client(&self) -> Result<&AsyncClient, LinkError> {
        self.client
            .as_ref()
            .ok_or_else(|| LinkError::transport("no open MQTT session"))
    }

    /// Drop the current session without a DISCONNECT packet
    fn teardown(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        self.client = None;
        self.events = None;
    }

    async fn next_route(&mut self) -> RouteResult {
        let events = self
            .events
            .as_mut()
            .ok_or_else(|| LinkError::transport("no open MQTT session"))?;
        match events.recv().await {
            Some(route) => route,
            None => Err(LinkError::transport("MQTT event loop stopped")),
        }
    }

    async fn wait_for_connack(&mut self) -> Result<(), LinkError> {
        loop {
            match self.next_route().await? {
                EventRoute::ConnectionAcknowledged => return Ok(()),
                EventRoute::Disconnected(reason) => return Err(LinkError::transport(reason)),
                EventRoute::Malformed(e) => warn!(error = %e, "Dropped malformed packet"),
                other => trace!(route = ?other, "Event before CONNACK"),
            }
        }
    }
}

/// Poll the event loop until the first connection error or until the receiver is gone
async fn drive_event_loop(mut event_loop: EventLoop, events: mpsc::UnboundedSender<RouteResult>) {
    loop {
        let item = match event_loop.poll().await {
            Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                EventRoute::Outgoing => continue,
                EventRoute::Infrastructure(packet) => {
                    trace!(target: "mqtt_transport", %packet, "MQTT event");
                    continue;
                }
                EventRoute::SubscriptionConfirmed {
                    packet_id,
                    reason_codes,
                } => {
                    debug!(target: "mqtt_transport", packet_id, %reason_codes, "Subscription confirmed");
                    continue;
                }
                route => Ok(route),
            },
            Err(e) => {
                let error = classify_connection_error(&e);
                debug!(target: "mqtt_transport", error = %error, "MQTT event loop stopped");
                let _ = events.send(Err(error));
                break;
            }
        };

        if events.send(item).is_err() {
            break;
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&mut self) -> Result<(), LinkError> {
        self.teardown();

        let (client, event_loop) = AsyncClient::new(self.options.clone(), REQUEST_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.driver = Some(tokio::spawn(drive_event_loop(event_loop, events_tx)));
        self.client = Some(client);
        self.events = Some(events_rx);

        let (host, port) = self.options.broker_address();
        debug!(%host, port, client_id = %self.options.client_id(), "Opening MQTT session");

        match self.wait_for_connack().await {
            Ok(()) => {
                info!(%host, port, "MQTT session established");
                Ok(())
            }
            Err(e) => {
                self.teardown();
                Err(e)
            }
        }
    }

    async fn subscribe(&mut self, filter: &str, qos: Qos) -> Result<(), LinkError> {
        self.client()?
            .subscribe(filter, to_mqtt_qos(qos))
            .await
            .map_err(|e| LinkError::transport(format!("subscribe to {filter} failed: {e}")))
    }

    async fn unsubscribe(&mut self, filter: &str) -> Result<(), LinkError> {
        self.client()?
            .unsubscribe(filter)
            .await
            .map_err(|e| LinkError::transport(format!("unsubscribe from {filter} failed: {e}")))
    }

    async fn publish(&mut self, message: &OutboundMessage) -> Result<(), LinkError> {
        self.client()?
            .publish(
                message.topic.as_str(),
                to_mqtt_qos(message.qos),
                message.retain,
                message.payload.clone(),
            )
            .await
            .map_err(|e| LinkError::transport(format!("publish to {} failed: {e}", message.topic)))
    }

    async fn poll(&mut self) -> Result<LinkEvent, LinkError> {
        loop {
            match self.next_route().await? {
                EventRoute::MessageReceived(message) => return Ok(LinkEvent::Message(message)),
                EventRoute::Disconnected(reason) => return Ok(LinkEvent::Disconnected(reason)),
                EventRoute::Malformed(e) => return Err(e),
                other => trace!(route = ?other, "Ignored MQTT event"),
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.disconnect().await {
                debug!(error = %e, "DISCONNECT not sent");
            }
        }
        self.events = None;

        if let Some(mut driver) = self.driver.take() {
            if tokio::time::timeout(DISCONNECT_GRACE, &mut driver).await.is_err() {
                driver.abort();
            }
        }
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.teardown();
    }
}
