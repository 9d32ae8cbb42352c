//! Integration tests with a real MQTT broker
//!
//! These validate the rumqttc-backed transport end to end:
//! - connecting to a real broker
//! - subscribe, publish and wildcard delivery
//! - retained messages
//!
//! All tests are ignored unless run with `--ignored`; see the helpers module.


use mqtt_integration_helpers::{broker_config, unique_prefix, DELIVERY_TIMEOUT};
use schoolbridge_live::live::{ConnectionState, LiveClient, PublishOutcome};
use schoolbridge_live::protocol::{OutboundMessage, Qos};
use tokio::time::timeout;

#[tokio::test]
#[ignore = "needs an MQTT broker on localhost:1883"]
async fn test_connect_to_real_broker() {
    let client = LiveClient::from_config(&broker_config("sb-it-connect"), None).unwrap();

    client.connect().await.expect("should connect to broker");
    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(client.health().is_healthy);

    client.disconnect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
#[ignore = "needs an MQTT broker on localhost:1883"]
async fn test_publish_subscribe_round_trip() {
    let prefix = unique_prefix();
    let client = LiveClient::from_config(&broker_config("sb-it-roundtrip"), None).unwrap();

    let (_registration, mut updates) = client
        .handler_channel(&format!("{prefix}/+/alerts"), 16)
        .await
        .unwrap();
    client
        .subscribe(&format!("{prefix}/#"), Qos::AtLeastOnce)
        .await
        .unwrap();
    client.connect().await.unwrap();

    let topic = format!("{prefix}/42/alerts");
    let outcome = client
        .publish(&topic, "early dismissal", Qos::AtLeastOnce)
        .await
        .unwrap();
    assert_eq!(outcome, PublishOutcome::Sent);

    let received = timeout(DELIVERY_TIMEOUT, updates.recv())
        .await
        .expect("message should arrive")
        .expect("channel open");
    assert_eq!(received.topic, topic);
    assert_eq!(received.payload_str().unwrap(), "early dismissal");

    client.disconnect().await.unwrap();
}

#[tokio::test]
#[ignore = "needs an MQTT broker on localhost:1883"]
async fn test_retained_message_delivered_to_late_subscriber() {
    let prefix = unique_prefix();
    let topic = format!("{prefix}/announcements");

    let publisher = LiveClient::from_config(&broker_config("sb-it-publisher"), None).unwrap();
    publisher.connect().await.unwrap();
    publisher
        .publish_message(OutboundMessage::new(topic.as_str(), "term starts monday", Qos::AtLeastOnce).retained(true))
        .await
        .unwrap();
    publisher.disconnect().await.unwrap();

    let subscriber = LiveClient::from_config(&broker_config("sb-it-subscriber"), None).unwrap();
    let (_registration, mut updates) = subscriber.handler_channel(&topic, 4).await.unwrap();
    subscriber.subscribe(&topic, Qos::AtLeastOnce).await.unwrap();
    subscriber.connect().await.unwrap();

    let received = timeout(DELIVERY_TIMEOUT, updates.recv())
        .await
        .expect("retained message should arrive")
        .expect("channel open");
    assert!(received.retain);
    assert_eq!(received.payload_str().unwrap(), "term starts monday");

    // Clear the retained message
    subscriber
        .publish_message(OutboundMessage::new(topic.as_str(), "", Qos::AtLeastOnce).retained(true))
        .await
        .unwrap();
    subscriber.disconnect().await.unwrap();
}
