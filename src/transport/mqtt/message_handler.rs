//! Pure routing of rumqttc events and QoS conversion

use crate::error::LinkError;
use crate::protocol::{validate_topic_name, InboundMessage, Qos};
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::{mqttbytes::QoS, Event};

/// Convert between the crate QoS and the rumqttc QoS
pub fn to_mqtt_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

pub fn from_mqtt_qos(qos: QoS) -> Qos {
    match qos {
        QoS::AtMostOnce => Qos::AtMostOnce,
        QoS::AtLeastOnce => Qos::AtLeastOnce,
        QoS::ExactlyOnce => Qos::ExactlyOnce,
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Session accepted by the broker
    ConnectionAcknowledged,
    /// Publish on a subscribed topic
    MessageReceived(InboundMessage),
    /// A publish arrived but could not be turned into a message
    Malformed(LinkError),
    /// Broker sent DISCONNECT
    Disconnected(String),
    /// SUBACK received
    SubscriptionConfirmed { packet_id: u16, reason_codes: String },
    /// PINGRESP, PUBACK and the rest
    Infrastructure(String),
    /// Outgoing packet notification
    Outgoing,
}

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => {
                    Self::parse_publish(&publish.topic, &publish.payload, publish.qos, publish.retain)
                }
                Packet::Disconnect(disconnect) => EventRoute::Disconnected(format!(
                    "broker sent DISCONNECT: {:?}",
                    disconnect.reason_code
                )),
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    reason_codes: format!("{:?}", suback.return_codes),
                },
                other => EventRoute::Infrastructure(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::Outgoing,
        }
    }

    /// Turn a raw PUBLISH into an inbound message, or a protocol error
    pub fn parse_publish(
        topic: &[u8],
        payload: &bytes::Bytes,
        qos: QoS,
        retain: bool,
    ) -> EventRoute {
        let topic = match std::str::from_utf8(topic) {
            Ok(topic) => topic,
            Err(_) => {
                return EventRoute::Malformed(LinkError::protocol(
                    "PUBLISH topic is not valid UTF-8",
                ))
            }
        };

        if let Err(e) = validate_topic_name(topic) {
            return EventRoute::Malformed(LinkError::protocol(format!(
                "PUBLISH topic '{topic}' rejected: {e}"
            )));
        }

        let mut message = InboundMessage::new(topic, payload.clone());
        message.qos = from_mqtt_qos(qos);
        message.retain = retain;
        EventRoute::MessageReceived(message)
    }
}
