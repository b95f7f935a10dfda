//! Pure connection state and option handling for the MQTT transport
//!
//! This module contains the session states, the transport error type and the
//! translation of a [`ChatConfig`] into rumqttc options for one attempt.

use super::tls::{trust_config_from_file, TrustBuildError};
use crate::config::{ChatConfig, ConfigError};
use crate::transport::WillMessage;
use rumqttc::{LastWill, MqttOptions};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Connection state of the transport session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection and no attempt in flight
    Disconnected,
    /// A connect attempt is in flight
    Connecting,
    /// Connected and ready for publish/subscribe
    Connected,
}

impl SessionState {
    /// Connecting or connected: a new attempt would be redundant
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
        };
        f.write_str(label)
    }
}

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),
    #[error("Connection timed out after {0:?} without ConnAck")]
    ConnectTimeout(Duration),
    #[error("TLS trust setup failed")]
    Trust(#[from] TrustBuildError),
    #[error("Connection settings invalid")]
    Config(#[from] ConfigError),
    #[error("Not connected - current state: {state}")]
    NotConnected { state: SessionState },
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Disconnect failed")]
    CloseFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl TransportError {
    /// Whether this error happened while establishing a connection
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectFailed(_)
                | TransportError::ConnectTimeout(_)
                | TransportError::Trust(_)
                | TransportError::Config(_)
        )
    }
}

/// Build rumqttc options for one connect attempt
///
/// The TLS trust configuration is rebuilt from the CA file on every call and
/// credentials are resolved at call time.
pub fn configure_mqtt_options(
    client_id: &str,
    config: &ChatConfig,
    will: &WillMessage,
) -> Result<MqttOptions, TransportError> {
    let endpoint = config.endpoint()?;
    let mut mqtt_options = MqttOptions::new(client_id, endpoint.host.as_str(), endpoint.port);

    if endpoint.tls {
        let ca_path = config.broker.ca_cert.as_deref().ok_or_else(|| {
            ConfigError::InvalidConfig("TLS broker url requires broker.ca_cert".to_string())
        })?;
        let trust = trust_config_from_file(ca_path)?;
        mqtt_options.set_transport(trust.into_transport());
    }

    if let Some((username, password)) = config.credentials()? {
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(config.keep_alive());
    mqtt_options.set_clean_session(config.broker.clean_session);
    mqtt_options.set_last_will(LastWill::new(
        will.topic.clone(),
        will.payload.clone(),
        will.qos,
        false,
    ));

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::QoS;
    use std::path::PathBuf;

    fn test_will() -> WillMessage {
        WillMessage {
            topic: "demo/chat/room1".to_string(),
            payload: b"me|1|Usuario desconectado".to_vec(),
            qos: QoS::AtLeastOnce,
        }
    }

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }

    #[test]
    fn test_configure_plain_options() {
        let config = ChatConfig::test_config();
        let options = configure_mqtt_options("client-1", &config, &test_will()).unwrap();

        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(options.client_id(), "client-1");
        assert_eq!(options.keep_alive(), Duration::from_secs(20));
        assert!(!options.clean_session());
        assert!(options.credentials().is_none());

        let will = options.last_will().unwrap();
        assert_eq!(will.topic, "demo/chat/room1");
        assert_eq!(will.qos, QoS::AtLeastOnce);
        assert!(!will.retain);
    }

    #[test]
    fn test_configure_credentials() {
        let mut config = ChatConfig::test_config();
        config.broker.username = "carlo".to_string();
        config.broker.password = Some("123456".to_string());

        let options = configure_mqtt_options("client-1", &config, &test_will()).unwrap();
        assert_eq!(
            options.credentials(),
            Some(("carlo".to_string(), "123456".to_string()))
        );
    }

    #[test]
    fn test_configure_tls_with_bundled_ca() {
        let mut config = ChatConfig::test_config();
        config.broker.url = "ssl://localhost:8883".to_string();
        config.broker.ca_cert = Some(fixture("ca.pem"));

        let options = configure_mqtt_options("client-1", &config, &test_will()).unwrap();
        assert!(matches!(options.transport(), rumqttc::Transport::Tls(_)));
    }

    #[test]
    fn test_configure_tls_missing_ca_fails_attempt() {
        let mut config = ChatConfig::test_config();
        config.broker.url = "ssl://localhost:8883".to_string();
        config.broker.ca_cert = Some(fixture("does-not-exist.crt"));

        let err = configure_mqtt_options("client-1", &config, &test_will()).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Trust(TrustBuildError::AssetUnreadable { .. })
        ));
        assert!(err.is_connect_failure());
    }

    #[test]
    fn test_session_state_activity() {
        assert!(!SessionState::Disconnected.is_active());
        assert!(SessionState::Connecting.is_active());
        assert!(SessionState::Connected.is_active());
        assert_eq!(SessionState::Connected.to_string(), "connected");
    }

    #[test]
    fn test_transport_error_display() {
        let errors = vec![
            TransportError::ConnectFailed("refused".to_string()),
            TransportError::ConnectTimeout(Duration::from_secs(30)),
            TransportError::NotConnected {
                state: SessionState::Disconnected,
            },
            TransportError::PublishFailed("test".to_string().into()),
            TransportError::SubscriptionFailed("test".to_string().into()),
            TransportError::CloseFailed("test".to_string().into()),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
