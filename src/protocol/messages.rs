//! Chat message types
//!
//! [`ChatMessage`] is what the display layer observes. Only `sender_id`,
//! `timestamp_millis` and `text` travel over the wire; `from_self` is
//! attributed on receipt.

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A chat message as delivered to the display layer
///
/// # Examples
/// ```
/// use mqtt_chat::protocol::ChatMessage;
///
/// let msg = ChatMessage::new("RustClient_a", 1_700_000_000_000, "hola")
///     .attributed_to("RustClient_a");
/// assert!(msg.from_self);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// Per-process identifier of the publishing client
    pub sender_id: String,
    /// Sender-assigned send time in epoch milliseconds
    pub timestamp_millis: i64,
    /// Message body, may contain the field delimiter
    pub text: String,
    /// True when `sender_id` matches the local client identifier
    #[serde(default)]
    pub from_self: bool,
}

impl ChatMessage {
    pub fn new(sender_id: impl Into<String>, timestamp_millis: i64, text: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            timestamp_millis,
            text: text.into(),
            from_self: false,
        }
    }

    /// Set `from_self` by comparing the sender against the local client identifier
    pub fn attributed_to(mut self, local_client_id: &str) -> Self {
        self.from_self = self.sender_id == local_client_id;
        self
    }

    /// Sender timestamp as a UTC instant, if representable
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp_millis).single()
    }

    /// `HH:MM` in the local time zone, as chat bubbles display it
    pub fn local_time_label(&self) -> String {
        self.sent_at()
            .map(|t| t.with_timezone(&Local).format("%H:%M").to_string())
            .unwrap_or_else(|| "--:--".to_string())
    }
}

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
