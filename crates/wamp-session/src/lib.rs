//! # wamp-session
//!
//! Session layer of a WAMP v2 basic-profile peer.
//!
//! - **State machine**: [`SessionState`] with a fixed edge set; every
//!   transition names the state it expects to leave
//! - **Handshake**: HELLO / CHALLENGE / AUTHENTICATE / WELCOME / ABORT for
//!   both roles, WAMP-CRA (optionally salted) through [`AuthProvider`] and
//!   [`ClientCredentials`]
//! - **Dispatch**: inbound bytes are framed, decoded, checked against the
//!   current state and routed; any violation aborts the session
//! - **Correlation**: outstanding requests keyed by strictly increasing
//!   request ids, canceled exactly once at teardown
//! - **Callback gate**: a re-entrant switch in front of all user code
//! - **Router hooks**: [`ServerHandler`] for passive sessions
//!
//! The session owns no thread and never blocks. A transport drives it through
//! [`Session::on_read`] / [`Session::on_close`] and receives frames through
//! [`IoHandle`].

#![deny(unsafe_code)]

pub mod auth;
pub mod errors;
pub mod gate;
pub mod reply;
pub mod server;
pub mod session;
pub mod state;
mod tables;
pub mod testing;
pub mod transport;
pub mod types;

pub use auth::{AllowAll, AuthMode, AuthPolicy, AuthProvider, ClientCredentials, SaltParams};
pub use errors::{SessionError, TransportError};
pub use gate::CallbackGate;
pub use reply::Reply;
pub use server::ServerHandler;
pub use session::Session;
pub use state::{Role, SessionState};
pub use transport::IoHandle;
pub use types::{
    CallResult, ErrorReply, Event, Invocation, RequestId, SessionCallbacks, SessionHandle,
};

pub use wamp_core::{Dict, WampArgs};
