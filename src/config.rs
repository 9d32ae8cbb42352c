//! Configuration for the live-update client
//!
//! Loaded from a TOML file. Credentials are never stored in the file: the
//! `[mqtt]` section names the environment variables that carry them, and the
//! upstream auth client normally supplies them directly as [`Credentials`].

use crate::live::backoff::ReconnectPolicy;
use crate::protocol::{validate_topic_filter, Qos};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LiveConfig {
    pub client: ClientSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub queue: QueueSection,
    /// Subscriptions registered before the first connect
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionEntry>,
}

/// Client identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSection {
    /// Client identifier prefix (must match [a-zA-Z0-9._-]+)
    pub id: String,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL: mqtt://, tcp://, mqtts:// or ssl://
    pub broker_url: String,
    /// Environment variable containing the MQTT username
    pub username_env: Option<String>,
    /// Environment variable containing the session token used as password
    pub token_env: Option<String>,
    /// Keep-alive interval in seconds (default: 60)
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Upper bound for a single connection attempt in seconds (default: 10)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Start a fresh broker session on every connect (default: true)
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_clean_session() -> bool {
    true
}

impl MqttSection {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn broker_address(&self) -> Result<BrokerAddress, ConfigError> {
        BrokerAddress::parse(&self.broker_url)
    }
}

/// Host, port and TLS flag extracted from a broker URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerAddress {
    /// Parse `mqtt://`, `tcp://` (plain, port 1883) or `mqtts://`, `ssl://` (TLS, port 8883)
    pub fn parse(broker_url: &str) -> Result<Self, ConfigError> {
        let url =
            Url::parse(broker_url).map_err(|_| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;

        let tls = match url.scheme() {
            "mqtt" | "tcp" => false,
            "mqtts" | "ssl" => true,
            _ => return Err(ConfigError::InvalidBrokerUrl(broker_url.to_string())),
        };
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;
        let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

        Ok(Self {
            host: host.to_string(),
            port,
            tls,
        })
    }
}

/// Reconnection backoff settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    /// First retry delay in milliseconds (default: 1000)
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// Delay cap in milliseconds (default: 30000)
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// Relative jitter applied to every delay (default: 0.2 = ±20%)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Attempts before giving up; absent means retry forever
    pub max_attempts: Option<u32>,
}

fn default_base_delay() -> u64 {
    1_000
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            jitter: default_jitter(),
            max_attempts: None,
        }
    }
}

impl ReconnectSection {
    pub fn to_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
            max_attempts: self.max_attempts,
        }
    }
}

/// Publish queue settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueSection {
    /// Maximum number of buffered publishes (default: 1000)
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

fn default_queue_capacity() -> usize {
    1_000
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

/// A subscription declared in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionEntry {
    pub filter: String,
    #[serde(default)]
    pub qos: Qos,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid client ID format: {0}")]
    InvalidClientId(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Session credentials handed over by the upstream auth client
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub token: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            token: token.into(),
        }
    }

    /// Resolve credentials from the environment variables named in `[mqtt]`
    ///
    /// Returns `None` when no username variable is configured or it is unset.
    pub fn from_env(mqtt: &MqttSection) -> Option<Self> {
        let username = mqtt
            .username_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())?;
        let token = mqtt
            .token_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
            .unwrap_or_default();
        Some(Self { username, token })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("token", &"***")
            .finish()
    }
}

impl LiveConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: LiveConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_client_id(&self.client.id)?;
        self.mqtt.broker_address()?;

        self.reconnect
            .to_policy()
            .validate()
            .map_err(ConfigError::InvalidConfig)?;

        if self.queue.capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "queue.capacity must be greater than 0".to_string(),
            ));
        }

        if self.mqtt.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        for entry in &self.subscriptions {
            validate_topic_filter(&entry.filter).map_err(|e| {
                ConfigError::InvalidConfig(format!("subscription '{}': {e}", entry.filter))
            })?;
        }

        Ok(())
    }

    /// Create a configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[client]
id = "parent-app"

[mqtt]
broker_url = "mqtt://localhost:1883"
"#;
        Self::from_toml_str(toml_content).expect("Test config should parse")
    }
}

/// Validate client ID format
fn validate_client_id(client_id: &str) -> Result<(), ConfigError> {
    let valid_chars = client_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if client_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidClientId(format!(
            "Client ID '{client_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}
