//! Message types carried over the live-update channel
//!
//! Outbound and inbound message records, the QoS level, and the JSON
//! notification envelope the SchoolBridge backend publishes.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Delivery-guarantee level for a publish or subscription
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum Qos {
    /// 0 - fire and forget
    AtMostOnce,
    /// 1 - acknowledged delivery, duplicates possible
    #[default]
    AtLeastOnce,
    /// 2 - four-way handshake, no duplicates
    ExactlyOnce,
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> u8 {
        match qos {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for Qos {
    type Error = InvalidQos;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(InvalidQos(other)),
        }
    }
}

/// Rejected QoS level (only 0, 1 and 2 exist)
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid QoS level {0}, expected 0, 1 or 2")]
pub struct InvalidQos(pub u8);

impl fmt::Display for Qos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// A publish waiting in (or passing through) the publish queue
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: Qos,
    pub retain: bool,
    pub enqueued_at: DateTime<Utc>,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: Qos) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain: false,
            enqueued_at: Utc::now(),
        }
    }

    pub fn retained(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}

/// A message received from the broker, handed to the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    /// Delivery level the broker used for this message
    pub qos: Qos,
    pub retain: bool,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: Qos::AtMostOnce,
            retain: false,
            received_at: Utc::now(),
        }
    }

    /// Payload as UTF-8 text
    pub fn payload_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.payload)
    }

    /// Decode a JSON payload
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// Category of a live notification, drives which screen reacts to it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Alert,
    Grade,
    Message,
    Finance,
    Announcement,
}

/// JSON envelope published by the SchoolBridge backend on school and user topics
///
/// # Examples
/// ```
/// use schoolbridge_live::protocol::{LiveNotification, NotificationKind};
///
/// let notification = LiveNotification::new(
///     NotificationKind::Alert,
///     "School closed",
///     "Heavy rain: classes are suspended today.",
/// );
/// let json = serde_json::to_string(&notification).unwrap();
/// assert!(json.contains("\"kind\":\"alert\""));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveNotification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

impl LiveNotification {
    pub fn new(kind: NotificationKind, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            title: title.into(),
            body: body.into(),
            sent_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_qos_conversions() {
        for level in 0u8..=2 {
            let qos = Qos::try_from(level).unwrap();
            assert_eq!(u8::from(qos), level);
        }
        assert_eq!(Qos::try_from(3), Err(InvalidQos(3)));
        assert_eq!(Qos::default(), Qos::AtLeastOnce);
    }

    #[test]
    fn test_qos_serializes_as_number() {
        assert_eq!(serde_json::to_value(Qos::ExactlyOnce).unwrap(), json!(2));
        let parsed: Qos = serde_json::from_value(json!(0)).unwrap();
        assert_eq!(parsed, Qos::AtMostOnce);
        assert!(serde_json::from_value::<Qos>(json!(7)).is_err());
    }

    #[test]
    fn test_inbound_payload_helpers() {
        let message = InboundMessage::new("school/42/alerts", r#"{"kind":"alert"}"#);
        assert_eq!(message.payload_str().unwrap(), r#"{"kind":"alert"}"#);

        let value: serde_json::Value = message.json().unwrap();
        assert_eq!(value["kind"], "alert");

        let binary = InboundMessage::new("school/42/alerts", vec![0xff, 0xfe]);
        assert!(binary.payload_str().is_err());
    }

    #[test]
    fn test_notification_envelope_decodes() {
        let payload = json!({
            "id": "6f1c1f5e-7d0a-4a55-9d8e-2c1b9f0f6a11",
            "kind": "grade",
            "title": "New grade",
            "body": "Mathematics: 17/20",
            "sent_at": "2024-03-01T08:30:00Z"
        });
        let message = InboundMessage::new("school/42/grades", payload.to_string());
        let notification: LiveNotification = message.json().unwrap();
        assert_eq!(notification.kind, NotificationKind::Grade);
        assert_eq!(notification.title, "New grade");
    }

    #[test]
    fn test_outbound_builder() {
        let message = OutboundMessage::new("users/7/messages", "hi", Qos::AtMostOnce).retained(true);
        assert!(message.retain);
        assert_eq!(message.payload, Bytes::from_static(b"hi"));
    }
}
