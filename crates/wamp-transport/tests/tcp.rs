//! End-to-end sessions over loopback TCP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use wamp_core::{Dict, WampArgs, uri};
use wamp_session::{
    AuthPolicy, AuthProvider, ClientCredentials, ErrorReply, Reply, ServerHandler, Session,
    SessionCallbacks, SessionHandle, SessionState,
};
use wamp_settings::WampSettings;
use wamp_transport::{ConnectError, LinkStatus, Listener, join};

const WAIT: Duration = Duration::from_secs(5);

// ── Fixtures ────────────────────────────────────────────────────────────

struct Users;

impl AuthProvider for Users {
    fn policy(&self, user: &str, realm: &str) -> AuthPolicy {
        match (user, realm) {
            (_, r) if r != "realm1" => AuthPolicy::forbidden(),
            ("bob", _) => AuthPolicy::authenticate([uri::WAMPCRA]),
            _ => AuthPolicy::open(),
        }
    }

    fn user_secret(&self, user: &str, _realm: &str) -> Option<String> {
        (user == "bob").then(|| "secret123".to_string())
    }
}

/// Echoes `echo`, fails everything else, fans publications out to every
/// other subscriber.
#[derive(Default)]
struct Hub {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(u64, u64, SessionHandle)>>,
}

impl ServerHandler for Hub {
    fn inbound_call(
        &self,
        _session: &Session,
        procedure: &str,
        _options: Dict,
        args: WampArgs,
        reply: Reply,
    ) {
        if procedure == "echo" {
            reply.result(args);
        } else {
            reply.error(uri::NO_SUCH_PROCEDURE, WampArgs::new());
        }
    }

    fn inbound_subscribe(
        &self,
        session: &Session,
        _topic: &str,
        _options: &Dict,
    ) -> Result<u64, ErrorReply> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.subscribers
            .lock()
            .push((id, session.unique_id(), session.handle()));
        Ok(id)
    }

    fn inbound_publish(
        &self,
        session: &Session,
        _topic: &str,
        _options: &Dict,
        args: WampArgs,
    ) -> Result<u64, ErrorReply> {
        let publication = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let targets: Vec<_> = self
            .subscribers
            .lock()
            .iter()
            .filter(|(_, owner, _)| *owner != session.unique_id())
            .map(|(id, _, handle)| (*id, handle.clone()))
            .collect();
        for (id, handle) in targets {
            if let Some(subscriber) = handle.upgrade() {
                let _ = subscriber.event(id, publication, Dict::new(), args.clone());
            }
        }
        Ok(publication)
    }
}

fn listener_settings() -> WampSettings {
    let mut settings = WampSettings::default();
    settings.transport.port = 0;
    settings
}

fn client_settings(addr: SocketAddr) -> WampSettings {
    let mut settings = WampSettings::default();
    settings.transport.host = addr.ip().to_string();
    settings.transport.port = addr.port();
    settings
}

async fn serve() -> (SocketAddr, CancellationToken, tokio::task::JoinHandle<()>) {
    let router: Arc<dyn ServerHandler> = Arc::new(Hub::default());
    let listener = Listener::bind(&listener_settings(), Arc::new(Users), Some(router))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(listener.serve(cancel.clone()));
    (addr, cancel, task)
}

async fn call(session: &Session, procedure: &str, args: WampArgs) -> wamp_session::CallResult {
    let (tx, rx) = oneshot::channel();
    let _ = session
        .call(procedure, Dict::new(), args, move |result| {
            let _ = tx.send(result);
        })
        .unwrap();
    timeout(WAIT, rx).await.unwrap().unwrap()
}

// ── Tests ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn call_round_trips_over_tcp() {
    let (addr, cancel, server) = serve().await;
    let connection = join(
        &client_settings(addr),
        ClientCredentials::anonymous("realm1"),
        SessionCallbacks::new(),
    )
    .await
    .unwrap();
    assert_eq!(connection.status(), LinkStatus::Open);
    assert_eq!(connection.peer(), addr);
    assert_eq!(connection.session().realm(), "realm1");

    let result = call(
        connection.session(),
        "echo",
        WampArgs::list(vec![json!(1), json!("two")]),
    )
    .await;
    assert!(!result.is_error());
    assert_eq!(result.args.args, vec![json!(1), json!("two")]);

    let missing = call(connection.session(), "nope", WampArgs::new()).await;
    assert_eq!(missing.error.as_deref(), Some(uri::NO_SUCH_PROCEDURE));

    connection.shutdown().await;
    cancel.cancel();
    timeout(WAIT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn wampcra_over_tcp() {
    let (addr, cancel, _server) = serve().await;
    let connection = join(
        &client_settings(addr),
        ClientCredentials::wampcra("realm1", "bob", "secret123"),
        SessionCallbacks::new(),
    )
    .await
    .unwrap();
    assert!(connection.session().is_open());
    connection.shutdown().await;
    cancel.cancel();
}

#[tokio::test]
async fn wrong_secret_is_rejected() {
    let (addr, cancel, _server) = serve().await;
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    let result = join(
        &client_settings(addr),
        ClientCredentials::wampcra("realm1", "bob", "wrong"),
        SessionCallbacks::new().on_state_change(move |_, open| sink.lock().push(open)),
    )
    .await;
    assert_matches!(result, Err(ConnectError::Rejected));
    assert_eq!(*states.lock(), vec![false]);
    cancel.cancel();
}

#[tokio::test]
async fn unknown_realm_is_rejected() {
    let (addr, cancel, _server) = serve().await;
    let result = join(
        &client_settings(addr),
        ClientCredentials::anonymous("elsewhere"),
        SessionCallbacks::new(),
    )
    .await;
    assert_matches!(result, Err(ConnectError::Rejected));
    cancel.cancel();
}

#[tokio::test]
async fn publish_reaches_other_subscriber() {
    let (addr, cancel, _server) = serve().await;
    let settings = client_settings(addr);
    let subscriber = join(
        &settings,
        ClientCredentials::anonymous("realm1"),
        SessionCallbacks::new(),
    )
    .await
    .unwrap();
    let publisher = join(
        &settings,
        ClientCredentials::anonymous("realm1"),
        SessionCallbacks::new(),
    )
    .await
    .unwrap();

    let (event_tx, mut events) = mpsc::unbounded_channel();
    let (ack_tx, ack) = oneshot::channel();
    let _ = subscriber
        .session()
        .subscribe(
            "news",
            Dict::new(),
            move |event| {
                let _ = event_tx.send(event);
            },
            move |result| {
                let _ = ack_tx.send(result);
            },
        )
        .unwrap();
    let subscription = timeout(WAIT, ack).await.unwrap().unwrap().unwrap();

    let mut options = Dict::new();
    let _ = options.insert("acknowledge".into(), json!(true));
    let _ = publisher
        .session()
        .publish("news", options, WampArgs::list(vec![json!("hello")]))
        .unwrap();

    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event.subscription_id, subscription);
    assert_eq!(event.args.args, vec![json!("hello")]);

    publisher.shutdown().await;
    subscriber.shutdown().await;
    cancel.cancel();
}

#[tokio::test]
async fn client_shutdown_closes_server_side() {
    let listener = Listener::bind(&listener_settings(), Arc::new(Users), None)
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let accepting = tokio::spawn(async move {
        let mut server = listener.accept(SessionCallbacks::new()).await.unwrap();
        server.wait_open().await.unwrap();
        server
    });

    let client = join(
        &client_settings(addr),
        ClientCredentials::anonymous("realm1"),
        SessionCallbacks::new(),
    )
    .await
    .unwrap();
    let mut server = timeout(WAIT, accepting).await.unwrap().unwrap();
    assert!(server.session().is_open());

    client.shutdown().await;
    timeout(WAIT, server.wait_closed()).await.unwrap();
    assert_eq!(server.session().state(), SessionState::Closed);
    assert_eq!(server.status(), LinkStatus::Closed);
    server.shutdown().await;
}

#[tokio::test]
async fn passive_session_without_router_rejects_calls() {
    let listener = Listener::bind(&listener_settings(), Arc::new(Users), None)
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let _server = tokio::spawn(listener.serve(cancel.clone()));

    let client = join(
        &client_settings(addr),
        ClientCredentials::anonymous("realm1"),
        SessionCallbacks::new(),
    )
    .await
    .unwrap();
    let result = call(client.session(), "echo", WampArgs::new()).await;
    assert!(result.is_error());
    client.shutdown().await;
    cancel.cancel();
}

#[tokio::test]
async fn stopping_listener_closes_clients() {
    let (addr, cancel, server) = serve().await;
    let closed = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&closed);
    let mut client = join(
        &client_settings(addr),
        ClientCredentials::anonymous("realm1"),
        SessionCallbacks::new().on_closed(move |_| *flag.lock() = true),
    )
    .await
    .unwrap();

    cancel.cancel();
    timeout(WAIT, server).await.unwrap().unwrap();
    timeout(WAIT, client.wait_closed()).await.unwrap();
    assert!(*closed.lock());
    assert_eq!(client.session().state(), SessionState::Closed);
}

#[tokio::test]
async fn silent_router_fails_handshake() {
    let raw = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = raw.local_addr().unwrap();
    let _hold = tokio::spawn(async move {
        let (socket, _) = raw.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(socket);
    });

    let mut settings = client_settings(addr);
    settings.session.handshake_timeout_secs = 1;
    let result = timeout(
        WAIT,
        join(
            &settings,
            ClientCredentials::anonymous("realm1"),
            SessionCallbacks::new(),
        ),
    )
    .await
    .unwrap();
    assert_matches!(
        result,
        Err(ConnectError::HandshakeTimeout(_) | ConnectError::Rejected)
    );
}

#[tokio::test]
async fn connect_refused_is_io_error() {
    let raw = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = raw.local_addr().unwrap();
    drop(raw);
    let result = join(
        &client_settings(addr),
        ClientCredentials::anonymous("realm1"),
        SessionCallbacks::new(),
    )
    .await;
    assert_matches!(result, Err(ConnectError::Io(_)));
}
