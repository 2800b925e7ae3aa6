//! # wamp-transport
//!
//! Tokio TCP transport for `wamp-session`.
//!
//! - [`connect`] / [`join`] run an active session over an outbound socket
//! - [`Listener`] accepts sockets and runs a passive session on each
//! - a heartbeat driver sends HEARTBEAT while open and closes silent peers
//! - a handshake deadline closes sessions that never open
//!
//! Connection and byte counts go through the `metrics` facade.

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod heartbeat;
pub mod metrics;
pub mod tcp;

pub use connection::TcpHandle;
pub use errors::ConnectError;
pub use heartbeat::{HeartbeatResult, handshake_deadline, run_heartbeat};
pub use tcp::{Connection, LinkStatus, Listener, connect, join};
