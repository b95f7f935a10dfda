//! Configuration system for the chat client
//!
//! A single TOML file with `[broker]`, `[client]` and `[reconnect]` sections.
//! Only `broker.url` and `broker.topic` are required; everything else has the
//! defaults the client has always shipped with.

use crate::protocol::{validate_chat_topic, validate_client_id_prefix};
use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Top-level chat client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatConfig {
    pub broker: BrokerSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

/// Broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL: `mqtt://`, `tcp://`, `mqtts://` or `ssl://`
    pub url: String,
    /// The one topic published to and subscribed from
    pub topic: String,
    /// QoS used uniformly for subscribe, publish and the last will
    #[serde(default = "default_qos")]
    pub qos: u8,
    /// CA certificate (PEM or DER) trusted for TLS endpoints
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
    /// Username; empty disables authentication
    #[serde(default)]
    pub username: String,
    /// Literal password
    #[serde(default)]
    pub password: Option<String>,
    /// Environment variable holding the password (takes precedence)
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default)]
    pub clean_session: bool,
}

/// Client identity section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSection {
    /// Client IDs are `<id_prefix>_<uuid>`
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
    /// Body of the last-will departure notice
    #[serde(default = "default_will_message")]
    pub will_message: String,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            id_prefix: default_id_prefix(),
            will_message: default_will_message(),
        }
    }
}

/// Reconnection section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    /// Fixed delay between connection loss and the next attempt
    #[serde(default = "default_reconnect_delay")]
    pub delay_secs: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            delay_secs: default_reconnect_delay(),
        }
    }
}

fn default_qos() -> u8 {
    1
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_keep_alive() -> u64 {
    20
}

fn default_id_prefix() -> String {
    "RustClient".to_string()
}

fn default_will_message() -> String {
    "Usuario desconectado".to_string()
}

fn default_reconnect_delay() -> u64 {
    5
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Parsed broker address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerEndpoint {
    /// Parse a broker URL; TLS schemes default to 8883, plain ones to 1883
    pub fn parse(broker_url: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(broker_url)
            .map_err(|e| ConfigError::InvalidConfig(format!("broker url {broker_url}: {e}")))?;

        let tls = match url.scheme() {
            "mqtt" | "tcp" => false,
            "mqtts" | "ssl" => true,
            other => {
                return Err(ConfigError::InvalidConfig(format!(
                    "unsupported broker scheme '{other}'"
                )))
            }
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigError::InvalidConfig(format!("broker url {broker_url} has no host")))?
            .to_string();
        let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

        Ok(Self { host, port, tls })
    }
}

impl ChatConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;

        // Relative CA paths are resolved against the config file's directory
        if let (Some(ca), Some(dir)) = (&config.broker.ca_cert, path.parent()) {
            if ca.is_relative() {
                config.broker.ca_cert = Some(dir.join(ca));
            }
        }

        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ChatConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = self.endpoint()?;

        validate_chat_topic(&self.broker.topic)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        validate_client_id_prefix(&self.client.id_prefix)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        qos_from_level(self.broker.qos)?;

        if endpoint.tls && self.broker.ca_cert.is_none() {
            return Err(ConfigError::InvalidConfig(
                "TLS broker url requires broker.ca_cert".to_string(),
            ));
        }

        if self.broker.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.keep_alive_secs must be greater than 0".to_string(),
            ));
        }

        if self.broker.connection_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.connection_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.reconnect.delay_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "reconnect.delay_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn endpoint(&self) -> Result<BrokerEndpoint, ConfigError> {
        BrokerEndpoint::parse(&self.broker.url)
    }

    pub fn qos(&self) -> Result<QoS, ConfigError> {
        qos_from_level(self.broker.qos)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.broker.connection_timeout_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.broker.keep_alive_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect.delay_secs)
    }

    /// Credentials to present, or None when authentication is disabled
    ///
    /// The password is read from `password_env` at call time when configured.
    pub fn credentials(&self) -> Result<Option<(String, String)>, ConfigError> {
        if self.broker.username.is_empty() {
            return Ok(None);
        }

        let password = match &self.broker.password_env {
            Some(var) => {
                std::env::var(var).map_err(|_| ConfigError::EnvVarNotFound(var.clone()))?
            }
            None => self.broker.password.clone().unwrap_or_default(),
        };

        Ok(Some((self.broker.username.clone(), password)))
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[broker]
url = "mqtt://localhost:1883"
topic = "demo/chat/room1"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Map a numeric QoS level onto the transport's QoS
pub fn qos_from_level(level: u8) -> Result<QoS, ConfigError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(ConfigError::InvalidConfig(format!(
            "broker.qos must be 0, 1 or 2, got {other}"
        ))),
    }
}
