//! Pure connection configuration and error classification for the MQTT transport

use crate::config::{BrokerAddress, ConfigError, Credentials, MqttSection};
use crate::error::LinkError;
use rumqttc::v5::mqttbytes::v5::ConnectReturnCode;
use rumqttc::v5::{ConnectionError, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;

/// Largest packet accepted or sent, in bytes
pub const MAX_PACKET_SIZE: u32 = 256 * 1024;

/// Build MQTT options for one session
///
/// `client_id` is used as-is; callers add the per-process suffix.
pub fn configure_mqtt_options(
    client_id: &str,
    config: &MqttSection,
    credentials: Option<&Credentials>,
) -> Result<MqttOptions, ConfigError> {
    let BrokerAddress { host, port, tls } = config.broker_address()?;

    let mut mqtt_options = MqttOptions::new(client_id, host, port);

    if tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(credentials) = credentials {
        mqtt_options.set_credentials(&credentials.username, &credentials.token);
    }

    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
    mqtt_options.set_clean_start(config.clean_session);
    mqtt_options.set_max_packet_size(Some(MAX_PACKET_SIZE));

    Ok(mqtt_options)
}

/// Whether a CONNACK refusal means the credentials will never be accepted
pub fn is_auth_refusal(code: &ConnectReturnCode) -> bool {
    matches!(
        code,
        ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::NotAuthorized
            | ConnectReturnCode::Banned
            | ConnectReturnCode::BadAuthenticationMethod
    )
}

/// Map an event-loop error onto the retry taxonomy
///
/// Every event-loop error ends the session. Credential refusals are terminal,
/// everything else is retried.
pub fn classify_connection_error(error: &ConnectionError) -> LinkError {
    match error {
        ConnectionError::ConnectionRefused(code) if is_auth_refusal(code) => {
            LinkError::auth(format!("broker refused connection: {code:?}"))
        }
        other => LinkError::transport(other.to_string()),
    }
}
