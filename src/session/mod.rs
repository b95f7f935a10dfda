//! Chat session layer
//!
//! - [`transport_session`] - connection state machine over a [`Transport`](crate::transport::Transport)
//! - [`reconnect`] - fixed-delay retry after loss or failed attempts
//! - [`store`] - append-only message log and its feeds
//! - [`manager`] - [`ChatSession`], the public surface tying them together

pub mod manager;
pub mod reconnect;
pub mod store;
pub mod transport_session;

pub use manager::{ChatSession, SendOutcome, SessionSettings};
pub use reconnect::{ReconnectionController, RetryDecision, DEFAULT_RECONNECT_DELAY};
pub use store::{MessageFeed, MessageStore};
pub use transport_session::{ConnectOutcome, SessionEvent, TransportSession, TransportSettings};
