//! Reply continuation for inbound requests.
//!
//! A [`Reply`] answers one INVOCATION (with YIELD or ERROR) or, on the router
//! side, one inbound CALL (with RESULT or ERROR). Answering consumes it.

use std::fmt;

use tracing::{debug, warn};
use wamp_core::{Dict, Message, MessageType, WampArgs};

use crate::types::SessionHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReplyKind {
    /// Answers an INVOCATION.
    Yield,
    /// Answers a CALL.
    Result,
}

/// One-shot continuation answering an inbound request.
///
/// Dropping it unanswered while the session is still open logs a warning;
/// the peer is left waiting. Answering after the session closed does nothing.
pub struct Reply {
    session: SessionHandle,
    kind: ReplyKind,
    request_id: u64,
    answered: bool,
}

impl Reply {
    pub(crate) fn for_invocation(session: SessionHandle, request_id: u64) -> Self {
        Self::new(session, ReplyKind::Yield, request_id)
    }

    pub(crate) fn for_call(session: SessionHandle, request_id: u64) -> Self {
        Self::new(session, ReplyKind::Result, request_id)
    }

    fn new(session: SessionHandle, kind: ReplyKind, request_id: u64) -> Self {
        Self {
            session,
            kind,
            request_id,
            answered: false,
        }
    }

    /// Request id being answered.
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Answer successfully.
    pub fn result(mut self, args: WampArgs) {
        self.answered = true;
        let message = match self.kind {
            ReplyKind::Yield => Message::Yield {
                request_id: self.request_id,
                options: Dict::new(),
                args,
            },
            ReplyKind::Result => Message::Result {
                request_id: self.request_id,
                details: Dict::new(),
                args,
            },
        };
        self.send(&message);
    }

    /// Answer with an error uri.
    pub fn error(mut self, uri: impl Into<String>, args: WampArgs) {
        self.answered = true;
        let request_type = match self.kind {
            ReplyKind::Yield => MessageType::Invocation,
            ReplyKind::Result => MessageType::Call,
        };
        self.send(&Message::error(request_type, self.request_id, uri, args));
    }

    fn send(&self, message: &Message) {
        let Some(session) = self.session.upgrade() else {
            debug!(request_id = self.request_id, "reply after session dropped");
            return;
        };
        if let Err(e) = session.send_if_open(message) {
            debug!(request_id = self.request_id, error = %e, "reply not sent");
        }
    }
}

impl Drop for Reply {
    fn drop(&mut self) {
        if self.answered {
            return;
        }
        let open = self.session.upgrade().is_some_and(|s| s.is_open());
        if open {
            warn!(
                request_id = self.request_id,
                kind = ?self.kind,
                "reply dropped without answering"
            );
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("kind", &self.kind)
            .field("request_id", &self.request_id)
            .field("answered", &self.answered)
            .finish_non_exhaustive()
    }
}
