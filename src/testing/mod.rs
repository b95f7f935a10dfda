//! Testing utilities and mock implementations
//!
//! This module provides mock implementations for testing the chat session
//! without requiring a running MQTT broker.

pub mod mocks;

pub use mocks::*;
