//! Frame and message decoding errors.

use thiserror::Error;

use crate::message::MessageType;

/// A frame decoded as JSON but does not form a valid message.
///
/// Every variant is a protocol violation from the session's point of view.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The message array has no elements.
    #[error("empty message array")]
    Empty,

    /// Element 0 is not an unsigned integer.
    #[error("message type code is not an unsigned integer")]
    BadTypeCode,

    /// Element 0 names a message type outside the supported catalogue.
    #[error("unknown message type {0}")]
    UnknownType(u64),

    /// Wrong number of elements for the message type.
    #[error("{kind} expects {min}..={max} elements, got {got}")]
    Arity {
        /// Message type being decoded.
        kind: MessageType,
        /// Minimum element count (including the type code).
        min: usize,
        /// Maximum element count (including the type code).
        max: usize,
        /// Actual element count.
        got: usize,
    },

    /// An element has the wrong JSON type.
    #[error("{kind} element {index} must be {expected}")]
    FieldType {
        /// Message type being decoded.
        kind: MessageType,
        /// Zero-based position in the message array.
        index: usize,
        /// Human-readable expected type.
        expected: &'static str,
    },
}

/// Errors from the length-prefixed frame codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Underlying I/O failure (required by the `tokio_util` codec traits).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Declared or encoded frame length is over the configured limit.
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Frame payload length in bytes.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Payload is not valid JSON.
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload is JSON but not an array.
    #[error("frame payload is not a JSON array")]
    NotAnArray,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_display() {
        let err = DecodeError::Arity {
            kind: MessageType::Call,
            min: 4,
            max: 6,
            got: 2,
        };
        assert_eq!(err.to_string(), "CALL expects 4..=6 elements, got 2");
    }

    #[test]
    fn field_type_display() {
        let err = DecodeError::FieldType {
            kind: MessageType::Hello,
            index: 1,
            expected: "string",
        };
        assert_eq!(err.to_string(), "HELLO element 1 must be string");
    }

    #[test]
    fn frame_too_large_display() {
        let err = CodecError::FrameTooLarge { len: 10, max: 5 };
        assert_eq!(err.to_string(), "frame of 10 bytes exceeds limit of 5");
    }

    #[test]
    fn json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: CodecError = json_err.into();
        assert!(matches!(err, CodecError::Json(_)));
    }
}
