//! Codec for encoding and decoding Roomcast envelopes.
//!
//! Envelopes travel as one JSON document per WebSocket text frame, so no
//! additional framing is needed beyond a size check.

use thiserror::Error;

use crate::envelope::Envelope;

/// Maximum encoded envelope size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Structurally valid JSON that is not a usable envelope.
    #[error("Invalid envelope: {0}")]
    Invalid(String),
}

/// Encode an envelope to a JSON string.
///
/// # Errors
///
/// Returns an error if the envelope is too large or encoding fails.
pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(envelope)?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(text)
}

/// Decode an envelope from a JSON string.
///
/// # Errors
///
/// Returns an error if the data is too large, not JSON, or has an empty event name.
pub fn decode(data: &str) -> Result<Envelope, ProtocolError> {
    decode_bytes(data.as_bytes())
}

/// Decode an envelope from raw bytes (binary frames).
///
/// # Errors
///
/// Returns an error if the data is too large, not JSON, or has an empty event name.
pub fn decode_bytes(data: &[u8]) -> Result<Envelope, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    let envelope: Envelope = serde_json::from_slice(data)?;
    if envelope.event.is_empty() {
        return Err(ProtocolError::Invalid("empty event name".into()));
    }

    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let encoded = encode(&Envelope::subscribe("orders")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value, json!({"event": "subscribe", "data": "orders"}));
    }

    #[test]
    fn test_decode_application_event() {
        let decoded = decode(
            r#"{"event":"order-updated","data":{"room":"orders","data":{"id":1},"timestamp":"t"}}"#,
        )
        .unwrap();
        assert_eq!(decoded.event, "order-updated");
        assert_eq!(decoded.data["data"]["id"], 1);
    }

    #[test]
    fn test_decode_invalid() {
        assert!(matches!(decode("not json"), Err(ProtocolError::Json(_))));
        assert!(matches!(
            decode(r#"{"event":"","data":null}"#),
            Err(ProtocolError::Invalid(_))
        ));
    }

    #[test]
    fn test_frame_too_large() {
        let envelope = Envelope::new("big", json!("x".repeat(MAX_FRAME_SIZE)));

        match encode(&envelope) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }

        let oversized = vec![b' '; MAX_FRAME_SIZE + 1];
        assert!(matches!(
            decode_bytes(&oversized),
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }
}
