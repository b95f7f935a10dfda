//! MQTT chat client
//!
//! A real-time chat client over a single MQTT topic. The crate provides the
//! session core a display layer needs: one managed broker connection with
//! fixed-delay reconnection, TLS trust pinned to a single CA, the
//! `sender|timestamp|text` wire codec, and an ordered feed of delivered
//! messages.
//!
//! # Overview
//!
//! - [`protocol`] - chat message type, wire codec, topic and client id rules
//! - [`transport`] - the [`Transport`](transport::Transport) seam and the rumqttc implementation
//! - [`session`] - state machine, reconnection controller, message store, [`ChatSession`]
//! - [`config`] - TOML configuration
//! - [`observability`] - tracing setup
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_chat::protocol::{decode, encode};
//!
//! let payload = encode("RustClient_a", 1_700_000_000_000, "precio: 10|20");
//! let message = decode(&payload).unwrap().attributed_to("RustClient_b");
//!
//! assert_eq!(message.text, "precio: 10|20");
//! assert!(!message.from_self);
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{ChatConfig, ConfigError};
pub use error::{ChatError, ChatResult, ErrorKind};
pub use protocol::{ChatMessage, DecodeError};
pub use session::{ChatSession, ConnectOutcome, MessageFeed, SendOutcome, SessionSettings};
pub use transport::mqtt::MqttClient;
pub use transport::SessionState;
