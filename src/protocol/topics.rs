//! Topic and client identifier rules for the chat protocol
//!
//! The chat topic is published to as well as subscribed to, so it must be a
//! concrete topic name. Client identifiers become the first wire field and
//! therefore may not contain the field delimiter.

use super::codec::FIELD_DELIMITER;
use thiserror::Error;
use uuid::Uuid;

/// Longest topic name an MQTT packet can carry
const MAX_TOPIC_BYTES: usize = 65_535;

/// Validate that `topic` can be used for both publish and subscribe
pub fn validate_chat_topic(topic: &str) -> Result<(), ValidationError> {
    if topic.is_empty() {
        return Err(ValidationError::EmptyTopic);
    }

    if topic.len() > MAX_TOPIC_BYTES {
        return Err(ValidationError::TopicTooLong(topic.len()));
    }

    for ch in topic.chars() {
        match ch {
            '+' | '#' => return Err(ValidationError::WildcardInTopic(ch)),
            '\0' => return Err(ValidationError::NulInTopic),
            _ => {}
        }
    }

    Ok(())
}

/// Validate the configured client identifier prefix
pub fn validate_client_id_prefix(prefix: &str) -> Result<(), ValidationError> {
    if prefix.is_empty() {
        return Err(ValidationError::EmptyClientIdPrefix);
    }

    for ch in prefix.chars() {
        if ch == FIELD_DELIMITER || ch.is_whitespace() || ch.is_control() {
            return Err(ValidationError::InvalidClientIdChar(ch));
        }
    }

    Ok(())
}

/// Generate the per-process client identifier: `<prefix>_<uuid v4>`
pub fn generate_client_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4())
}

/// Validation errors for chat topics and identifiers
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Chat topic cannot be empty")]
    EmptyTopic,
    #[error("Chat topic is {0} bytes, longer than the MQTT limit")]
    TopicTooLong(usize),
    #[error("Chat topic contains wildcard '{0}'")]
    WildcardInTopic(char),
    #[error("Chat topic contains a NUL character")]
    NulInTopic,
    #[error("Client ID prefix cannot be empty")]
    EmptyClientIdPrefix,
    #[error("Client ID prefix contains invalid character: '{0}'")]
    InvalidClientIdChar(char),
}
