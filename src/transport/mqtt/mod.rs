//! MQTT transport built on rumqttc
//!
//! # Architecture
//!
//! - [`connection`] - session states, transport errors and option building
//! - [`message_handler`] - pure routing of rumqttc events
//! - [`tls`] - single-CA trust store construction
//! - [`client`] - the I/O side: event loop task, publish, subscribe, close
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_chat::config::ChatConfig;
//! use mqtt_chat::session::ChatSession;
//!
//! # tokio_test::block_on(async {
//! let config = ChatConfig::from_toml_str(r#"
//! [broker]
//! url = "mqtt://localhost:1883"
//! topic = "demo/chat/room1"
//! "#)?;
//!
//! let session = ChatSession::from_config(&config)?;
//! session.connect().await?;
//! session.send("hola").await?;
//! session.shutdown().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;
pub mod tls;

// Re-export public types for convenience
pub use client::MqttClient;
pub use connection::{configure_mqtt_options, SessionState, TransportError};
pub use message_handler::{EventRoute, MessageHandler};
pub use tls::{build_trust_config, TrustBuildError, TrustConfiguration};
