//! Values handed to application callbacks, and the callback signatures.

use std::fmt;
use std::sync::{Arc, Weak};

use wamp_core::{Dict, WampArgs, uri};

use crate::reply::Reply;
use crate::session::Session;

/// Client-assigned request identifier.
pub type RequestId = u64;

/// Non-owning reference to a session, as given to notifiers and stored by
/// transports and routers.
pub type SessionHandle = Weak<Session>;

/// Completion of `provide`, `subscribe`, `unprovide` or `unsubscribe`.
/// Carries the registration or subscription id.
pub type AckCallback = Box<dyn FnOnce(Result<u64, ErrorReply>) + Send>;

/// Completion of a `call`.
pub type CallCallback = Box<dyn FnOnce(CallResult) + Send>;

/// Procedure implementation; invoked once per INVOCATION.
pub type ProcedureHandler = Arc<dyn Fn(Invocation) + Send + Sync>;

/// Subscription handler; invoked once per EVENT.
pub type EventHandler = Arc<dyn Fn(Event) + Send + Sync>;

/// Completion of a router-side `invocation`: YIELD args or the callee's ERROR.
pub type InvocationCallback = Box<dyn FnOnce(Result<WampArgs, ErrorReply>) + Send>;

/// `(session, is_open)` on every transition to `Open` or `Closed`.
pub type StateChangeFn = Arc<dyn Fn(SessionHandle, bool) + Send + Sync>;

/// Runs once when the session reaches `Closed`.
pub type ClosedFn = Box<dyn FnOnce(SessionHandle) + Send>;

/// An error uri plus optional payload, as carried by ERROR and ABORT.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorReply {
    /// Error uri, e.g. `wamp.error.no_such_procedure`.
    pub uri: String,
    /// Optional payload.
    pub args: WampArgs,
}

impl ErrorReply {
    /// Error with no payload.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            args: WampArgs::new(),
        }
    }

    /// Error with a payload.
    pub fn with_args(uri: impl Into<String>, args: WampArgs) -> Self {
        Self {
            uri: uri.into(),
            args,
        }
    }

    /// Delivered to every request still pending at teardown.
    pub fn session_closed() -> Self {
        Self::new(uri::SESSION_CLOSED)
    }
}

impl fmt::Display for ErrorReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

/// Outcome of a `call`.
#[derive(Clone, Debug, PartialEq)]
pub struct CallResult {
    /// Request id returned by `call`.
    pub request_id: RequestId,
    /// Procedure that was called.
    pub procedure: String,
    /// RESULT details or ERROR details.
    pub details: Dict,
    /// Returned payload (error payload on failure).
    pub args: WampArgs,
    /// Error uri when the call failed.
    pub error: Option<String>,
}

impl CallResult {
    /// Whether the call failed.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// An EVENT delivered to a subscription handler.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// Subscription the event matched.
    pub subscription_id: u64,
    /// Router-assigned publication id.
    pub publication_id: u64,
    /// EVENT details.
    pub details: Dict,
    /// Published payload.
    pub args: WampArgs,
}

/// An INVOCATION delivered to a procedure handler.
///
/// The handler answers through [`reply`](Self::reply), now or later, from any
/// thread. Exactly one answer is expected.
#[derive(Debug)]
pub struct Invocation {
    /// Registration the invocation targets.
    pub registration_id: u64,
    /// Router-assigned request id.
    pub request_id: RequestId,
    /// INVOCATION details.
    pub details: Dict,
    /// Call payload.
    pub args: WampArgs,
    /// Continuation sending YIELD or ERROR.
    pub reply: Reply,
}

/// Notifiers registered at construction.
#[derive(Default)]
pub struct SessionCallbacks {
    /// Called on each transition to `Open` (`true`) or `Closed` (`false`).
    /// Subject to the callback gate.
    pub on_state_change: Option<StateChangeFn>,
    /// Called exactly once at teardown, even after `disable_callback`.
    pub on_closed: Option<ClosedFn>,
}

impl SessionCallbacks {
    /// No notifiers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the state-change notifier.
    #[must_use]
    pub fn on_state_change(
        mut self,
        f: impl Fn(SessionHandle, bool) + Send + Sync + 'static,
    ) -> Self {
        self.on_state_change = Some(Arc::new(f));
        self
    }

    /// Set the closed notifier.
    #[must_use]
    pub fn on_closed(mut self, f: impl FnOnce(SessionHandle) + Send + 'static) -> Self {
        self.on_closed = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for SessionCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCallbacks")
            .field("on_state_change", &self.on_state_change.is_some())
            .field("on_closed", &self.on_closed.is_some())
            .finish()
    }
}
