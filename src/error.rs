//! Error types for the chat client
//!
//! Each layer has its own `thiserror` enum; [`ChatError`] wraps them for the
//! public session API. [`ChatError::kind`] classifies any error into the small
//! taxonomy the display layer and the reconnection logic care about.

use crate::config::ConfigError;
use crate::protocol::DecodeError;
use crate::session::SessionEvent;
use crate::transport::TransportError;
use thiserror::Error;

/// Main error type for chat session operations
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Handshake, authentication or network failure while connecting
    TransportConnect,
    /// Publish while offline or rejected by the transport; the message is dropped
    Publish,
    /// Undecodable payload; discarded without affecting the connection
    MalformedPayload,
    /// CA asset missing or unusable; fails only the attempt that needed it
    TrustBuild,
    /// Connection dropped after it was established
    ConnectionLost,
    /// Invalid or unreadable configuration
    Config,
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::Decode(_) => ErrorKind::MalformedPayload,
            ChatError::Config(_) => ErrorKind::Config,
            ChatError::ConnectionLost { .. } => ErrorKind::ConnectionLost,
            ChatError::Transport(e) => match e {
                TransportError::Trust(_) => ErrorKind::TrustBuild,
                TransportError::Config(_) => ErrorKind::Config,
                TransportError::NotConnected { .. } | TransportError::PublishFailed(_) => {
                    ErrorKind::Publish
                }
                TransportError::ConnectFailed(_)
                | TransportError::ConnectTimeout(_)
                | TransportError::SubscriptionFailed(_)
                | TransportError::CloseFailed(_) => ErrorKind::TransportConnect,
            },
        }
    }

    /// Whether a retry by the reconnection loop can clear this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Config | ErrorKind::MalformedPayload)
    }

    pub fn connection_lost<S: Into<String>>(reason: S) -> Self {
        Self::ConnectionLost {
            reason: reason.into(),
        }
    }
}

/// Session notifications surfaced to callers as errors
impl From<SessionEvent> for ChatError {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::ConnectionLost { reason } => Self::connection_lost(reason),
            SessionEvent::ConnectFailed { reason } => {
                Self::Transport(TransportError::ConnectFailed(reason))
            }
        }
    }
}

/// Result type for chat session operations
pub type ChatResult<T> = Result<T, ChatError>;
