//! The session: one logical WAMP connection.
//!
//! A [`Session`] is created by [`Session::active`] or [`Session::passive`] and
//! shared as `Arc<Session>`. It never spawns anything: it is driven by the
//! transport (through [`Session::on_read`] and [`Session::on_close`]) and by
//! application threads calling the outbound API.
//!
//! Locks are independent and short:
//!
//! | lock        | guards                                        |
//! |-------------|-----------------------------------------------|
//! | `pending`   | request-id counter and outstanding requests   |
//! | `registry`  | acknowledged registrations and subscriptions  |
//! | `transport` | the I/O handle, taken at teardown             |
//! | `state`     | lifecycle state                               |
//! | `read_buf`  | bytes received but not yet framed             |
//! | `gate`      | re-entrant; held while user code runs         |
//!
//! `gate` comes first: replies take it before touching `pending` or
//! `registry`, and those two may be held while reading `state`, never the
//! other way round. No user callback runs while any lock but `gate` is held.

mod dispatch;
mod handshake;
mod rpc;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::{Span, debug, info, info_span, warn};
use wamp_core::{Dict, FrameCodec, Message, WampArgs, uri};
use wamp_settings::SessionSettings;

use crate::auth::{AuthProvider, ClientCredentials};
use crate::errors::SessionError;
use crate::gate::CallbackGate;
use crate::server::ServerHandler;
use crate::state::{Role, SessionState};
use crate::tables::{Drained, PendingTables, Registry};
use crate::transport::IoHandle;
use crate::types::{
    CallResult, ClosedFn, ErrorReply, RequestId, SessionCallbacks, SessionHandle, StateChangeFn,
};

use self::handshake::HandshakeData;

static NEXT_UNIQUE_ID: AtomicU64 = AtomicU64::new(1);

/// Router used when none is supplied: every hook rejects.
struct NoRouter;

impl ServerHandler for NoRouter {}

/// Why the session is being torn down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Teardown {
    /// Closed from this side; the transport is told to close.
    Local,
    /// The transport reported the connection gone.
    TransportLost,
}

/// One logical WAMP connection.
pub struct Session {
    unique_id: u64,
    role: Role,
    this: SessionHandle,
    span: Span,
    settings: SessionSettings,
    codec: FrameCodec,
    created_at: Instant,
    last_message: Mutex<Instant>,

    state: Mutex<SessionState>,
    realm: OnceLock<String>,
    /// Protocol session id from WELCOME; 0 until known.
    wamp_session_id: AtomicU64,
    heartbeats_in: AtomicU64,
    heartbeats_out: AtomicU64,

    transport: Mutex<Option<Box<dyn IoHandle>>>,
    read_buf: Mutex<BytesMut>,
    pending: Mutex<PendingTables>,
    registry: Mutex<Registry>,
    gate: CallbackGate,

    on_state_change: Option<StateChangeFn>,
    on_closed: Mutex<Option<ClosedFn>>,

    credentials: Option<ClientCredentials>,
    auth: Option<Arc<dyn AuthProvider>>,
    server: Arc<dyn ServerHandler>,
    handshake: Mutex<HandshakeData>,
}

impl Session {
    // ── Construction ────────────────────────────────────────────────────

    /// Create the initiating side. Call
    /// [`initiate_handshake`](Self::initiate_handshake) to send HELLO.
    pub fn active(
        transport: Box<dyn IoHandle>,
        credentials: ClientCredentials,
        settings: &SessionSettings,
        callbacks: SessionCallbacks,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| {
            let mut session = Self::new(this, Role::Active, transport, settings, callbacks);
            let _ = session.realm.set(credentials.realm.clone());
            session.credentials = Some(credentials);
            session
        })
    }

    /// Create the accepting side. It waits for HELLO and consults `auth`.
    /// Without a `server` handler, inbound router requests are rejected.
    pub fn passive(
        transport: Box<dyn IoHandle>,
        auth: Arc<dyn AuthProvider>,
        server: Option<Arc<dyn ServerHandler>>,
        settings: &SessionSettings,
        callbacks: SessionCallbacks,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| {
            let mut session = Self::new(this, Role::Passive, transport, settings, callbacks);
            session.auth = Some(auth);
            if let Some(server) = server {
                session.server = server;
            }
            session
        })
    }

    fn new(
        this: &SessionHandle,
        role: Role,
        transport: Box<dyn IoHandle>,
        settings: &SessionSettings,
        callbacks: SessionCallbacks,
    ) -> Self {
        let unique_id = NEXT_UNIQUE_ID.fetch_add(1, Ordering::Relaxed);
        let span = info_span!("session", id = unique_id, %role);
        debug!(parent: &span, "session created");
        let now = Instant::now();
        Self {
            unique_id,
            role,
            this: this.clone(),
            span,
            settings: settings.clone(),
            codec: FrameCodec::new(settings.max_frame_len),
            created_at: now,
            last_message: Mutex::new(now),
            state: Mutex::new(SessionState::Init),
            realm: OnceLock::new(),
            wamp_session_id: AtomicU64::new(0),
            heartbeats_in: AtomicU64::new(0),
            heartbeats_out: AtomicU64::new(0),
            transport: Mutex::new(Some(transport)),
            read_buf: Mutex::new(BytesMut::new()),
            pending: Mutex::new(PendingTables::default()),
            registry: Mutex::new(Registry::default()),
            gate: CallbackGate::new(),
            on_state_change: callbacks.on_state_change,
            on_closed: Mutex::new(callbacks.on_closed),
            credentials: None,
            auth: None,
            server: Arc::new(NoRouter),
            handshake: Mutex::new(HandshakeData::default()),
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────

    /// Process-local id, unique across all sessions.
    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }

    /// Handshake role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Non-owning handle to this session.
    pub fn handle(&self) -> SessionHandle {
        self.this.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Whether RPC and pub/sub operations are allowed.
    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Whether the handshake is still in progress.
    pub fn is_pending_open(&self) -> bool {
        self.state().is_pending_open()
    }

    /// Realm joined; empty until a passive session receives HELLO.
    pub fn realm(&self) -> &str {
        self.realm.get().map_or("", String::as_str)
    }

    /// Protocol session id announced in WELCOME.
    pub fn peer_session_id(&self) -> Option<u64> {
        match self.wamp_session_id.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    /// Configured heartbeat interval.
    pub fn hb_interval(&self) -> Duration {
        Duration::from_secs(self.settings.heartbeat_interval_secs)
    }

    /// Whether the transport should drive heartbeats.
    pub fn uses_heartbeats(&self) -> bool {
        self.settings.uses_heartbeats()
    }

    /// Settings the session was created with.
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Time since construction.
    pub fn duration_since_creation(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the last accepted inbound frame (or construction).
    pub fn duration_since_last_message(&self) -> Duration {
        self.last_message.lock().elapsed()
    }

    /// Number of requests awaiting a reply.
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Send HEARTBEAT.
    pub fn send_heartbeat(&self) -> Result<(), SessionError> {
        let _span = self.span.enter();
        self.check_open()?;
        let outgoing_seq = self.heartbeats_out.fetch_add(1, Ordering::Relaxed) + 1;
        self.send(&Message::Heartbeat {
            incoming_seq: self.heartbeats_in.load(Ordering::Relaxed),
            outgoing_seq,
        })
    }

    /// Stop delivering callbacks. Waits for callbacks running on other
    /// threads to return, so it blocks for as long as such a callback does.
    /// The closed notifier still fires.
    pub fn disable_callback(&self) {
        self.gate.disable();
    }

    /// Close the session. Idempotent.
    ///
    /// An open session says GOODBYE first; a session still in the handshake
    /// sends ABORT. Pending requests are canceled with
    /// `wamp.error.session_closed`.
    pub fn close(&self) {
        let _span = self.span.enter();
        match self.state() {
            SessionState::Closing | SessionState::Closed => {}
            SessionState::Open => {
                if self
                    .transition(SessionState::Open, SessionState::Closing)
                    .is_ok()
                {
                    self.send_quietly(&Message::goodbye(uri::CLOSE_REALM));
                }
                self.shutdown(Teardown::Local);
            }
            SessionState::Init => self.shutdown(Teardown::Local),
            _ => {
                self.send_quietly(&Message::abort(
                    uri::SYSTEM_SHUTDOWN,
                    "session closed by application",
                ));
                self.shutdown(Teardown::Local);
            }
        }
    }

    // ── Internals ───────────────────────────────────────────────────────

    /// Move from `expected` to `next`, or fail leaving the state unchanged.
    fn transition(&self, expected: SessionState, next: SessionState) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        let actual = *state;
        if actual != expected || !expected.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                expected,
                actual,
                next,
            });
        }
        *state = next;
        drop(state);
        debug!(from = %expected, to = %next, "state transition");
        Ok(())
    }

    fn check_open(&self) -> Result<(), SessionError> {
        match self.state() {
            SessionState::Open => Ok(()),
            SessionState::Closing | SessionState::Closed => Err(SessionError::Closed),
            state => Err(SessionError::NotOpen { state }),
        }
    }

    fn touch(&self) {
        *self.last_message.lock() = Instant::now();
    }

    fn encode(&self, message: &Message) -> Result<Bytes, SessionError> {
        let mut codec = self.codec;
        Ok(codec.encode_message(message)?)
    }

    fn write_frame(&self, frame: Bytes) -> Result<(), SessionError> {
        let transport = self.transport.lock();
        let io = transport.as_ref().ok_or(SessionError::Closed)?;
        io.write(frame)?;
        Ok(())
    }

    /// Encode and write regardless of state.
    fn send(&self, message: &Message) -> Result<(), SessionError> {
        let frame = self.encode(message)?;
        self.write_frame(frame)?;
        debug!(kind = %message.message_type(), "frame sent");
        Ok(())
    }

    /// Encode and write, only while open.
    pub(crate) fn send_if_open(&self, message: &Message) -> Result<(), SessionError> {
        self.check_open()?;
        self.send(message)
    }

    /// Best effort; used on the way out.
    fn send_quietly(&self, message: &Message) {
        if let Err(e) = self.send(message) {
            debug!(kind = %message.message_type(), error = %e, "frame not sent");
        }
    }

    /// Invoke the state-change notifier through the gate.
    fn notify_state(&self, is_open: bool) {
        if let Some(notify) = &self.on_state_change {
            let notify = Arc::clone(notify);
            let handle = self.handle();
            self.gate.run(move || notify(handle, is_open));
        }
    }

    /// Tear down: mark `Closed`, release the transport, cancel every pending
    /// request, notify. Runs at most once.
    fn shutdown(&self, teardown: Teardown) {
        let previous = {
            let mut state = self.state.lock();
            if *state == SessionState::Closed {
                return;
            }
            std::mem::replace(&mut *state, SessionState::Closed)
        };
        info!(from = %previous, ?teardown, "session closed");

        let transport = self.transport.lock().take();
        if let Some(io) = transport {
            if teardown == Teardown::Local {
                io.close();
            }
        }

        let drained = self.pending.lock().drain();
        let registry = std::mem::take(&mut *self.registry.lock());
        self.handshake.lock().clear();
        self.read_buf.lock().clear();

        self.cancel(drained);
        drop(registry);

        self.notify_state(false);
        self.gate.disable();

        let on_closed = self.on_closed.lock().take();
        if let Some(on_closed) = on_closed {
            on_closed(self.handle());
        }
    }

    fn cancel(&self, drained: Drained) {
        for (request_id, call) in drained.calls {
            let result = CallResult {
                request_id,
                procedure: call.procedure,
                details: Dict::new(),
                args: WampArgs::new(),
                error: Some(uri::SESSION_CLOSED.to_string()),
            };
            let callback = call.callback;
            self.gate.run(move || callback(result));
        }
        for (_, ack) in drained.acks {
            self.gate.run(move || ack(Err(ErrorReply::session_closed())));
        }
        if drained.invocations > 0 {
            debug!(count = drained.invocations, "dropped unanswered invocations");
        }
    }

    /// Allocate a request id, record the pending entry and send the request.
    ///
    /// The open check, id allocation and insert share one critical section,
    /// so an entry is never added after teardown drained the tables. A write
    /// failure leaves the entry to be canceled at close.
    fn request(
        &self,
        build: impl FnOnce(RequestId) -> Message,
        insert: impl FnOnce(&mut PendingTables, RequestId),
    ) -> Result<RequestId, SessionError> {
        let _span = self.span.enter();
        let (request_id, frame, kind) = {
            let mut pending = self.pending.lock();
            self.check_open()?;
            let request_id = pending.next_request_id();
            let message = build(request_id);
            let frame = self.encode(&message)?;
            insert(&mut pending, request_id);
            (request_id, frame, message.message_type())
        };
        match self.write_frame(frame) {
            Ok(()) => debug!(request_id, %kind, "request sent"),
            Err(e) => warn!(request_id, %kind, error = %e, "request not sent"),
        }
        Ok(request_id)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("unique_id", &self.unique_id)
            .field("role", &self.role)
            .field("state", &self.state())
            .field("realm", &self.realm())
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let state = *self.state.get_mut();
        if state != SessionState::Closed {
            debug!(parent: &self.span, %state, "session dropped before close");
        }
    }
}
