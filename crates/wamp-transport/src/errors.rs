//! Transport error types.

use wamp_session::SessionError;

/// Failure to establish or join a session over TCP.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// Socket setup failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The session refused to start the handshake.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// The session closed before reaching `Open`.
    #[error("session closed during handshake")]
    Rejected,

    /// The handshake did not complete in time.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(std::time::Duration),
}
