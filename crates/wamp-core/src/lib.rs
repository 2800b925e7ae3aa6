//! # wamp-core
//!
//! Shared protocol vocabulary for the WAMP session workspace.
//!
//! - **Messages**: [`MessageType`] codes and the typed [`Message`] enum with
//!   positional encode/decode of the WAMP v2 basic-profile catalogue
//! - **Arguments**: [`WampArgs`], the optional `Arguments|list` /
//!   `ArgumentsKw|dict` tail carried by calls, results, events and errors
//! - **Framing**: [`FrameCodec`], a 4-byte big-endian length prefix followed
//!   by the JSON text of the message array
//! - **Errors**: [`DecodeError`] and [`CodecError`] via `thiserror`, plus the
//!   well-known error and close reasons in [`uri`]
//! - **Logging**: `tracing` subscriber bootstrap and a capturing layer for tests

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod logging;
pub mod message;
pub mod uri;

pub use codec::{DEFAULT_MAX_FRAME_LEN, FrameCodec, HEADER_LEN};
pub use errors::{CodecError, DecodeError};
pub use message::{Dict, Message, MessageType, WampArgs};
