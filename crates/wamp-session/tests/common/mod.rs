//! Shared fixtures: a minimal in-process router, an auth table and a
//! notifier recorder.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use wamp_core::{Dict, WampArgs, uri};
use wamp_session::testing::{Link, MockTransport};
use wamp_session::{
    AuthPolicy, AuthProvider, ClientCredentials, ErrorReply, Reply, SaltParams, ServerHandler,
    Session, SessionCallbacks, SessionHandle,
};
use wamp_settings::SessionSettings;

// ── Notifier recorder ───────────────────────────────────────────────────

/// Records every state change and close notification.
#[derive(Default)]
pub struct Recorder {
    states: Mutex<Vec<bool>>,
    closed: AtomicUsize,
}

impl Recorder {
    pub fn callbacks(self: &Arc<Self>) -> SessionCallbacks {
        let states = Arc::clone(self);
        let closed = Arc::clone(self);
        SessionCallbacks::new()
            .on_state_change(move |_, open| states.states.lock().push(open))
            .on_closed(move |_| {
                let _ = closed.closed.fetch_add(1, Ordering::SeqCst);
            })
    }

    pub fn states(&self) -> Vec<bool> {
        self.states.lock().clone()
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

// ── Peers ───────────────────────────────────────────────────────────────

/// A session with its transport and recorder.
pub struct Peer {
    pub session: Arc<Session>,
    pub io: MockTransport,
    pub recorder: Arc<Recorder>,
}

pub fn client(credentials: ClientCredentials) -> Peer {
    let io = MockTransport::new();
    let recorder = Arc::new(Recorder::default());
    let session = Session::active(
        io.boxed(),
        credentials,
        &SessionSettings::default(),
        recorder.callbacks(),
    );
    Peer {
        session,
        io,
        recorder,
    }
}

pub fn server(auth: Arc<dyn AuthProvider>, router: Option<Arc<dyn ServerHandler>>) -> Peer {
    let io = MockTransport::new();
    let recorder = Arc::new(Recorder::default());
    let session = Session::passive(
        io.boxed(),
        auth,
        router,
        &SessionSettings::default(),
        recorder.callbacks(),
    );
    Peer {
        session,
        io,
        recorder,
    }
}

pub fn link(a: &Peer, b: &Peer) -> Link {
    Link::new(&a.session, &a.io, &b.session, &b.io)
}

/// Client and server after a completed handshake.
pub fn open_pair(
    credentials: ClientCredentials,
    auth: Arc<dyn AuthProvider>,
    router: Option<Arc<dyn ServerHandler>>,
) -> (Peer, Peer, Link) {
    let c = client(credentials);
    let s = server(auth, router);
    let l = link(&c, &s);
    c.session.initiate_handshake().unwrap();
    let _ = l.pump();
    assert!(c.session.is_open(), "client not open: {:?}", c.session.state());
    assert!(s.session.is_open(), "server not open: {:?}", s.session.state());
    (c, s, l)
}

// ── Auth table ──────────────────────────────────────────────────────────

struct User {
    secret: String,
    salt: Option<SaltParams>,
}

/// Users keyed by authid. Unknown users join without authentication.
#[derive(Default)]
pub struct Users {
    users: HashMap<String, User>,
    forbidden: Vec<String>,
}

impl Users {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, authid: &str, secret: &str) -> Self {
        let _ = self.users.insert(
            authid.to_string(),
            User {
                secret: secret.to_string(),
                salt: None,
            },
        );
        self
    }

    pub fn with_salted_user(mut self, authid: &str, secret: &str, salt: SaltParams) -> Self {
        let _ = self.users.insert(
            authid.to_string(),
            User {
                secret: secret.to_string(),
                salt: Some(salt),
            },
        );
        self
    }

    pub fn forbid(mut self, authid: &str) -> Self {
        self.forbidden.push(authid.to_string());
        self
    }
}

impl AuthProvider for Users {
    fn policy(&self, user: &str, _realm: &str) -> AuthPolicy {
        if self.forbidden.iter().any(|f| f == user) {
            AuthPolicy::forbidden()
        } else if self.users.contains_key(user) {
            AuthPolicy::authenticate([uri::WAMPCRA])
        } else {
            AuthPolicy::open()
        }
    }

    fn cra_salt(&self, user: &str, _realm: &str, _challenge: &str) -> Option<SaltParams> {
        self.users.get(user).and_then(|u| u.salt.clone())
    }

    fn user_secret(&self, user: &str, _realm: &str) -> Option<String> {
        self.users.get(user).map(|u| u.secret.clone())
    }
}

// ── Router ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct RouterState {
    next_id: u64,
    /// procedure uri -> (registration id, callee)
    procedures: HashMap<String, (u64, SessionHandle)>,
    /// subscription id -> (topic, subscriber)
    subscriptions: HashMap<u64, (String, SessionHandle)>,
}

impl RouterState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Routes calls to registered callees and events to subscribers, across
/// every passive session sharing it.
#[derive(Default)]
pub struct TestRouter {
    state: Mutex<RouterState>,
}

impl TestRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn procedure_count(&self) -> usize {
        self.state.lock().procedures.len()
    }
}

impl ServerHandler for TestRouter {
    fn inbound_call(
        &self,
        _session: &Session,
        procedure: &str,
        _options: Dict,
        args: WampArgs,
        reply: Reply,
    ) {
        let target = self.state.lock().procedures.get(procedure).cloned();
        let callee = target.and_then(|(id, handle)| handle.upgrade().map(|s| (id, s)));
        let Some((registration_id, callee)) = callee else {
            reply.error(uri::NO_SUCH_PROCEDURE, WampArgs::new());
            return;
        };

        let slot = Arc::new(Mutex::new(Some(reply)));
        let answer = Arc::clone(&slot);
        let sent = callee.invocation(registration_id, Dict::new(), args, move |outcome| {
            let reply = answer.lock().take();
            if let Some(reply) = reply {
                match outcome {
                    Ok(args) => reply.result(args),
                    Err(e) => reply.error(e.uri, e.args),
                }
            }
        });
        if sent.is_err() {
            let reply = slot.lock().take();
            if let Some(reply) = reply {
                reply.error(uri::NO_SUCH_PROCEDURE, WampArgs::new());
            }
        }
    }

    fn inbound_publish(
        &self,
        session: &Session,
        topic: &str,
        _options: &Dict,
        args: WampArgs,
    ) -> Result<u64, ErrorReply> {
        let (publication_id, targets) = {
            let mut state = self.state.lock();
            let publication_id = state.next_id();
            let targets: Vec<(u64, SessionHandle)> = state
                .subscriptions
                .iter()
                .filter(|(_, (t, _))| t == topic)
                .map(|(id, (_, handle))| (*id, handle.clone()))
                .collect();
            (publication_id, targets)
        };
        for (subscription_id, handle) in targets {
            let Some(subscriber) = handle.upgrade() else {
                continue;
            };
            if subscriber.unique_id() == session.unique_id() {
                continue;
            }
            let _ = subscriber.event(subscription_id, publication_id, Dict::new(), args.clone());
        }
        Ok(publication_id)
    }

    fn inbound_register(
        &self,
        session: &Session,
        procedure: &str,
        _options: &Dict,
    ) -> Result<u64, ErrorReply> {
        let mut state = self.state.lock();
        if state.procedures.contains_key(procedure) {
            return Err(ErrorReply::new(uri::PROCEDURE_ALREADY_EXISTS));
        }
        let id = state.next_id();
        let _ = state
            .procedures
            .insert(procedure.to_string(), (id, session.handle()));
        Ok(id)
    }

    fn inbound_subscribe(
        &self,
        session: &Session,
        topic: &str,
        _options: &Dict,
    ) -> Result<u64, ErrorReply> {
        let mut state = self.state.lock();
        let id = state.next_id();
        let _ = state
            .subscriptions
            .insert(id, (topic.to_string(), session.handle()));
        Ok(id)
    }

    fn inbound_unregister(&self, _session: &Session, registration_id: u64) -> Result<(), ErrorReply> {
        let mut state = self.state.lock();
        let name = state
            .procedures
            .iter()
            .find(|(_, (id, _))| *id == registration_id)
            .map(|(name, _)| name.clone());
        match name {
            Some(name) => {
                let _ = state.procedures.remove(&name);
                Ok(())
            }
            None => Err(ErrorReply::new(uri::NO_SUCH_REGISTRATION)),
        }
    }

    fn inbound_unsubscribe(
        &self,
        _session: &Session,
        subscription_id: u64,
    ) -> Result<(), ErrorReply> {
        match self.state.lock().subscriptions.remove(&subscription_id) {
            Some(_) => Ok(()),
            None => Err(ErrorReply::new(uri::NO_SUCH_SUBSCRIPTION)),
        }
    }
}

/// Router state shared between passive sessions, as a trait object.
pub fn shared(router: &Arc<TestRouter>) -> Option<Arc<dyn ServerHandler>> {
    Some(Arc::clone(router) as Arc<dyn ServerHandler>)
}
