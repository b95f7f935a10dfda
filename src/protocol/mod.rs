//! Chat wire protocol for the single shared topic
//!
//! Payloads are `"<sender_id>|<timestamp_millis>|<text>"`, UTF-8 encoded.
//! This module owns the message type, the codec and the identifier/topic
//! validation rules that keep the codec unambiguous.

pub mod codec;
pub mod messages;
pub mod topics;

pub use codec::{decode, encode, DecodeError, FIELD_DELIMITER};
pub use messages::*;
pub use topics::*;
