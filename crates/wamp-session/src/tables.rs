//! Correlation tables.
//!
//! [`PendingTables`] holds the request-id counter and every outstanding
//! request, keyed by request id; the session keeps it behind one mutex so
//! allocating an id and inserting its entry is a single critical section.
//! [`Registry`] holds the long-lived registrations and subscriptions, keyed
//! by the ids the router assigned.

use std::collections::HashMap;

use crate::types::{
    AckCallback, CallCallback, EventHandler, InvocationCallback, ProcedureHandler, RequestId,
};

// ─────────────────────────────────────────────────────────────────────────────
// Pending requests
// ─────────────────────────────────────────────────────────────────────────────

/// Outstanding CALL.
pub(crate) struct PendingCall {
    pub procedure: String,
    pub callback: CallCallback,
}

/// Outstanding REGISTER.
pub(crate) struct PendingRegister {
    pub procedure: String,
    pub handler: ProcedureHandler,
    pub ack: AckCallback,
}

/// Outstanding SUBSCRIBE.
pub(crate) struct PendingSubscribe {
    pub topic: String,
    pub handler: EventHandler,
    pub ack: AckCallback,
}

/// Outstanding UNREGISTER or UNSUBSCRIBE.
pub(crate) struct PendingRemoval {
    pub id: u64,
    pub ack: AckCallback,
}

/// Request-id counter plus one table per request kind.
#[derive(Default)]
pub(crate) struct PendingTables {
    last_request_id: RequestId,
    pub calls: HashMap<RequestId, PendingCall>,
    pub registers: HashMap<RequestId, PendingRegister>,
    pub subscribes: HashMap<RequestId, PendingSubscribe>,
    pub unregisters: HashMap<RequestId, PendingRemoval>,
    pub unsubscribes: HashMap<RequestId, PendingRemoval>,
    /// Router side: INVOCATIONs sent, awaiting YIELD or ERROR.
    pub invocations: HashMap<RequestId, InvocationCallback>,
}

impl PendingTables {
    /// Allocate the next request id. Ids start at 1 and never repeat.
    pub fn next_request_id(&mut self) -> RequestId {
        self.last_request_id += 1;
        self.last_request_id
    }

    /// Number of outstanding entries across all tables.
    pub fn len(&self) -> usize {
        self.calls.len()
            + self.registers.len()
            + self.subscribes.len()
            + self.unregisters.len()
            + self.unsubscribes.len()
            + self.invocations.len()
    }

    /// Empty every table, handing the entries over for cancellation.
    ///
    /// The counter is kept so ids stay unique for the session's lifetime.
    pub fn drain(&mut self) -> Drained {
        let mut calls: Vec<_> = self.calls.drain().collect();
        calls.sort_by_key(|(id, _)| *id);

        let mut acks: Vec<(RequestId, AckCallback)> = self
            .registers
            .drain()
            .map(|(id, p)| (id, p.ack))
            .chain(self.subscribes.drain().map(|(id, p)| (id, p.ack)))
            .chain(self.unregisters.drain().map(|(id, p)| (id, p.ack)))
            .chain(self.unsubscribes.drain().map(|(id, p)| (id, p.ack)))
            .collect();
        acks.sort_by_key(|(id, _)| *id);

        let invocations = self.invocations.len();
        self.invocations.clear();

        Drained {
            calls,
            acks,
            invocations,
        }
    }
}

/// Entries removed at teardown, in request-id order.
pub(crate) struct Drained {
    pub calls: Vec<(RequestId, PendingCall)>,
    pub acks: Vec<(RequestId, AckCallback)>,
    /// Router-side invocations dropped without a reply.
    pub invocations: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Registrations and subscriptions
// ─────────────────────────────────────────────────────────────────────────────

/// A procedure this session provides.
pub(crate) struct Procedure {
    pub uri: String,
    pub handler: ProcedureHandler,
}

/// A topic this session is subscribed to.
pub(crate) struct Subscription {
    pub topic: String,
    pub handler: EventHandler,
}

/// Registrations and subscriptions acknowledged by the peer.
#[derive(Default)]
pub(crate) struct Registry {
    pub procedures: HashMap<u64, Procedure>,
    pub subscriptions: HashMap<u64, Subscription>,
}

impl Registry {
    pub fn procedure_handler(&self, registration_id: u64) -> Option<ProcedureHandler> {
        self.procedures
            .get(&registration_id)
            .map(|p| ProcedureHandler::clone(&p.handler))
    }

    pub fn event_handler(&self, subscription_id: u64) -> Option<EventHandler> {
        self.subscriptions
            .get(&subscription_id)
            .map(|s| EventHandler::clone(&s.handler))
    }
}
