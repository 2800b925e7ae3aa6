//! Contract between a session and the byte transport underneath it.
//!
//! A transport owns the connection. It hands a boxed [`IoHandle`] to the
//! session factory and keeps a [`SessionHandle`](crate::SessionHandle) back to
//! the session, through which it calls [`Session::on_read`] for every chunk
//! received and [`Session::on_close`] once when the connection ends.
//!
//! [`Session::on_read`]: crate::Session::on_read
//! [`Session::on_close`]: crate::Session::on_close

use bytes::Bytes;

use crate::errors::TransportError;

/// Outbound half of a connection.
pub trait IoHandle: Send + Sync {
    /// Enqueue one encoded frame. Must not block.
    fn write(&self, frame: Bytes) -> Result<(), TransportError>;

    /// Flush what was already enqueued, then shut the connection.
    fn close(&self);
}
