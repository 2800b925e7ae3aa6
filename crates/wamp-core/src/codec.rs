//! Length-prefixed JSON framing.
//!
//! Each frame is a 4-byte big-endian payload length followed by the UTF-8
//! JSON text of one message array. Decoding works on an owned
//! [`BytesMut`]: a decode step either leaves the buffer untouched (not enough
//! bytes yet) or consumes exactly one frame, leaving any remainder buffered
//! for the next step.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

use crate::errors::CodecError;
use crate::message::Message;

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Default upper bound on a single frame payload (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Codec for length-prefixed message arrays.
#[derive(Clone, Copy, Debug)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl FrameCodec {
    /// Create a codec with the given payload limit (clamped to `u32::MAX`).
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            max_frame_len: max_frame_len.min(u32::MAX as usize),
        }
    }

    /// Configured payload limit.
    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Encode a message into a standalone frame.
    pub fn encode_message(&mut self, message: &Message) -> Result<Bytes, CodecError> {
        let frame = message.to_frame();
        let mut dst = BytesMut::new();
        self.encode(frame.as_slice(), &mut dst)?;
        Ok(dst.freeze())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl Decoder for FrameCodec {
    type Item = Vec<Value>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > self.max_frame_len {
            return Err(CodecError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }
        let needed = HEADER_LEN + len;
        if src.len() < needed {
            src.reserve(needed - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len);
        match serde_json::from_slice::<Value>(&payload)? {
            Value::Array(items) => Ok(Some(items)),
            _ => Err(CodecError::NotAnArray),
        }
    }
}

impl<'a> Encoder<&'a [Value]> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: &'a [Value], dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(item)?;
        if payload.len() > self.max_frame_len {
            return Err(CodecError::FrameTooLarge {
                len: payload.len(),
                max: self.max_frame_len,
            });
        }
        dst.reserve(HEADER_LEN + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Dict, WampArgs};
    use assert_matches::assert_matches;
    use serde_json::json;

    fn encoded(value: &Value) -> Vec<u8> {
        let body = serde_json::to_vec(value).unwrap();
        let mut out = (body.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn decode_needs_full_header() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[0u8, 0][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn decode_waits_for_fragmented_payload() {
        let mut codec = FrameCodec::default();
        let bytes = encoded(&json!([50, 1, {}, ["hello"]]));
        let (head, tail) = bytes.split_at(7);

        let mut buf = BytesMut::from(head);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 7, "partial frame must stay buffered");

        buf.extend_from_slice(tail);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(Value::Array(frame), json!([50, 1, {}, ["hello"]]));
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_leaves_remainder_for_next_frame() {
        let mut codec = FrameCodec::default();
        let mut bytes = encoded(&json!([1, "r1", {}]));
        let second = encoded(&json!([6, {}, "wamp.close.close_realm"]));
        bytes.extend_from_slice(&second[..5]);

        let mut buf = BytesMut::from(&bytes[..]);
        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(Value::Array(first), json!([1, "r1", {}]));
        assert_eq!(buf.len(), 5);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&second[5..]);
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn decode_rejects_oversized_declared_length() {
        let mut codec = FrameCodec::new(8);
        let mut buf = BytesMut::from(&encoded(&json!([1, "a-long-realm", {}]))[..]);
        assert_matches!(
            codec.decode(&mut buf),
            Err(CodecError::FrameTooLarge { max: 8, .. })
        );
    }

    #[test]
    fn decode_rejects_non_array() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&encoded(&json!({"type": 1}))[..]);
        assert_matches!(codec.decode(&mut buf), Err(CodecError::NotAnArray));
    }

    #[test]
    fn decode_rejects_invalid_json() {
        let mut codec = FrameCodec::default();
        let mut raw = 3u32.to_be_bytes().to_vec();
        raw.extend_from_slice(b"[1,");
        let mut buf = BytesMut::from(&raw[..]);
        assert_matches!(codec.decode(&mut buf), Err(CodecError::Json(_)));
    }

    #[test]
    fn encode_message_prefixes_length() {
        let mut codec = FrameCodec::default();
        let msg = Message::Call {
            request_id: 1,
            options: Dict::new(),
            procedure: "greet".into(),
            args: WampArgs::new(),
        };
        let bytes = codec.encode_message(&msg).unwrap();
        let body = br#"[48,1,{},"greet"]"#;
        assert_eq!(&bytes[..HEADER_LEN], &(body.len() as u32).to_be_bytes());
        assert_eq!(&bytes[HEADER_LEN..], &body[..]);
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let mut codec = FrameCodec::new(4);
        let msg = Message::goodbye("wamp.close.close_realm");
        assert_matches!(
            codec.encode_message(&msg),
            Err(CodecError::FrameTooLarge { max: 4, .. })
        );
    }

    #[test]
    fn max_frame_len_is_clamped() {
        let codec = FrameCodec::new(usize::MAX);
        assert_eq!(codec.max_frame_len(), u32::MAX as usize);
    }
}
