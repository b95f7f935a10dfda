//! Observability for the chat client
//!
//! Structured logging via `tracing`; see [`logging`] for the environment
//! variables that control it.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{reconnect_span, session_span};
