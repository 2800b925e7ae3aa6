//! Session and transport error types.

use wamp_core::CodecError;

use crate::state::SessionState;

/// Failure reported by an [`IoHandle`](crate::IoHandle).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection is gone; nothing more can be written.
    #[error("transport closed")]
    Closed,
    /// Underlying I/O failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by the session's public API.
///
/// Application-level RPC failures are not errors here: they arrive as data
/// through [`CallResult::error`](crate::CallResult) and
/// [`ErrorReply`](crate::ErrorReply).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The operation needs an open session and the handshake has not finished.
    #[error("session not open (state: {state})")]
    NotOpen {
        /// State at the time of the call.
        state: SessionState,
    },

    /// The session is closing or closed.
    #[error("session closed")]
    Closed,

    /// Only active sessions send HELLO.
    #[error("handshake can only be initiated by an active session")]
    NotActive,

    /// A state transition found the session in an unexpected state.
    #[error("invalid transition {expected} -> {next} (session is {actual})")]
    InvalidTransition {
        /// State the caller expected to leave.
        expected: SessionState,
        /// State the session was actually in.
        actual: SessionState,
        /// Requested target state.
        next: SessionState,
    },

    /// Inbound traffic broke the protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Writing to the transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Encoding an outbound frame failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
}
