//! Wire codec for chat payloads
//!
//! Encoding joins the three fields with [`FIELD_DELIMITER`]. Decoding splits
//! into at most three segments, so delimiters inside the text survive.

use super::messages::{now_millis, ChatMessage};
use thiserror::Error;

/// Single-character separator between wire fields
pub const FIELD_DELIMITER: char = '|';

/// Payload decoding failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed payload: expected 3 '|'-separated fields, found {found}")]
    MalformedPayload { found: usize },
}

/// Encode a chat message into its wire payload
///
/// Exactly two delimiters are inserted regardless of what `text` contains.
pub fn encode(sender_id: &str, timestamp_millis: i64, text: &str) -> Vec<u8> {
    format!("{sender_id}{FIELD_DELIMITER}{timestamp_millis}{FIELD_DELIMITER}{text}").into_bytes()
}

/// Decode a wire payload
///
/// A timestamp that is not an integer is replaced with the receiver's current
/// time rather than rejected. Invalid UTF-8 is replaced lossily. The returned
/// message has `from_self == false`; callers attribute it.
pub fn decode(payload: &[u8]) -> Result<ChatMessage, DecodeError> {
    let payload = String::from_utf8_lossy(payload);
    let mut segments = payload.splitn(3, FIELD_DELIMITER);

    let (Some(sender_id), Some(timestamp), Some(text)) =
        (segments.next(), segments.next(), segments.next())
    else {
        return Err(DecodeError::MalformedPayload {
            found: payload.split(FIELD_DELIMITER).count(),
        });
    };

    let timestamp_millis = timestamp.parse::<i64>().unwrap_or_else(|_| {
        tracing::debug!(
            target: "chat_codec",
            raw = %timestamp,
            "Unparseable timestamp, substituting local time"
        );
        now_millis()
    });

    Ok(ChatMessage::new(sender_id, timestamp_millis, text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_layout() {
        assert_eq!(encode("id", 42, "hello"), b"id|42|hello".to_vec());
    }

    #[test]
    fn test_encode_keeps_delimiters_in_text() {
        assert_eq!(encode("id", 7, "a|b|c"), b"id|7|a|b|c".to_vec());
    }

    #[test]
    fn test_encode_negative_timestamp() {
        assert_eq!(encode("id", -1, "x"), b"id|-1|x".to_vec());
    }

    #[test]
    fn test_decode_rejects_single_segment() {
        assert_eq!(
            decode(b"onlyonepart"),
            Err(DecodeError::MalformedPayload { found: 1 })
        );
    }

    #[test]
    fn test_decode_rejects_two_segments() {
        assert_eq!(decode(b"a|b"), Err(DecodeError::MalformedPayload { found: 2 }));
    }

    #[test]
    fn test_decode_minimal_payload() {
        let msg = decode(b"a|5|c").unwrap();
        assert_eq!(msg.sender_id, "a");
        assert_eq!(msg.timestamp_millis, 5);
        assert_eq!(msg.text, "c");
        assert!(!msg.from_self);
    }

    #[test]
    fn test_decode_empty_text() {
        let msg = decode(b"a|5|").unwrap();
        assert_eq!(msg.text, "");
    }

    #[test]
    fn test_decode_rejoins_text_delimiters() {
        let msg = decode(b"a|5|x|y||z").unwrap();
        assert_eq!(msg.text, "x|y||z");
    }

    #[test]
    fn test_decode_timestamp_fallback_uses_now() {
        let before = now_millis();
        let msg = decode(b"id|notanumber|hello").unwrap();
        let after = now_millis();

        assert_eq!(msg.sender_id, "id");
        assert_eq!(msg.text, "hello");
        assert!(msg.timestamp_millis >= before && msg.timestamp_millis <= after);
    }

    #[test]
    fn test_decode_invalid_utf8_is_lossy() {
        let msg = decode(b"id|1|caf\xff").unwrap();
        assert_eq!(msg.text, "caf\u{FFFD}");
    }

    proptest! {
        #[test]
        fn encode_decode_roundtrip(
            sender in "[A-Za-z0-9_-]{1,40}",
            ts in any::<i64>(),
            text in ".*",
        ) {
            let decoded = decode(&encode(&sender, ts, &text)).unwrap();
            prop_assert_eq!(decoded.sender_id, sender);
            prop_assert_eq!(decoded.timestamp_millis, ts);
            prop_assert_eq!(decoded.text, text);
        }

        #[test]
        fn decode_never_panics(payload in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode(&payload);
        }
    }
}
