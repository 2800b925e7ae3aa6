//! TCP connections carrying one WAMP session each.
//!
//! A connection owns two tasks: a writer draining the session's
//! [`TcpHandle`] queue and a reader feeding socket bytes into
//! [`Session::on_read`]. The reader holds only a weak reference; the
//! [`Connection`] returned to the caller keeps the session alive.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use metrics::{counter, gauge};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wamp_session::{
    AuthProvider, ClientCredentials, IoHandle, ServerHandler, Session, SessionCallbacks,
    SessionHandle, SessionState,
};
use wamp_settings::{SessionSettings, TransportSettings, WampSettings};

use crate::connection::{TcpHandle, run_writer};
use crate::errors::ConnectError;
use crate::heartbeat::{handshake_deadline, run_heartbeat};
use crate::metrics::{BYTES_IN_TOTAL, CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL};

/// Where a connection's session is in its life, as seen from outside.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    /// Handshake not finished.
    Connecting,
    /// Session open.
    Open,
    /// Session closed.
    Closed,
}

/// A session bound to a TCP socket.
pub struct Connection {
    session: Arc<Session>,
    peer: SocketAddr,
    status: watch::Receiver<LinkStatus>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    /// Wrap `stream`; `make` builds the session around the socket's handle
    /// and the tracking callbacks.
    fn spawn(
        stream: TcpStream,
        transport: &TransportSettings,
        session_settings: &SessionSettings,
        callbacks: SessionCallbacks,
        make: impl FnOnce(Box<dyn IoHandle>, SessionCallbacks) -> Arc<Session>,
    ) -> std::io::Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(transport.nodelay)?;
        let (read_half, write_half) = stream.into_split();

        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(LinkStatus::Connecting);
        let cancel = CancellationToken::new();
        let session = make(
            Box::new(TcpHandle::new(peer, tx)),
            track(callbacks, status_tx),
        );

        counter!(CONNECTIONS_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).increment(1.0);
        debug!(%peer, session = session.unique_id(), "connection established");

        let mut tasks = vec![
            tokio::spawn(run_writer(write_half, rx, cancel.clone())),
            tokio::spawn(run_reader(
                read_half,
                session.handle(),
                transport.read_chunk_size.max(1),
                cancel.clone(),
            )),
        ];
        if session.uses_heartbeats() {
            let timeout = Duration::from_secs(session_settings.heartbeat_timeout_secs);
            let heartbeat = run_heartbeat(
                session.handle(),
                session.hb_interval(),
                timeout,
                cancel.clone(),
            );
            tasks.push(tokio::spawn(async move {
                let result = heartbeat.await;
                debug!(?result, "heartbeat stopped");
            }));
        }
        if session_settings.handshake_timeout_secs > 0 {
            let limit = Duration::from_secs(session_settings.handshake_timeout_secs);
            let deadline = handshake_deadline(session.handle(), limit, cancel.clone());
            tasks.push(tokio::spawn(async move {
                let _ = deadline.await;
            }));
        }

        Ok(Self {
            session,
            peer,
            status,
            cancel,
            tasks,
        })
    }

    /// The session carried by this connection.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Remote address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Latest observed status.
    pub fn status(&self) -> LinkStatus {
        *self.status.borrow()
    }

    /// Wait for the handshake to finish.
    pub async fn wait_open(&mut self) -> Result<(), ConnectError> {
        let status = self
            .status
            .wait_for(|s| *s != LinkStatus::Connecting)
            .await
            .map(|s| *s)
            .unwrap_or(LinkStatus::Closed);
        match status {
            LinkStatus::Open => Ok(()),
            _ => Err(ConnectError::Rejected),
        }
    }

    /// Wait until the session is closed, by either side.
    pub async fn wait_closed(&mut self) {
        let _ = self.status.wait_for(|s| *s == LinkStatus::Closed).await;
    }

    /// Close the session.
    pub fn close(&self) {
        self.session.close();
    }

    /// Close the session and wait for the socket tasks to finish.
    pub async fn shutdown(mut self) {
        self.session.close();
        self.wait_closed().await;
        self.cancel.cancel();
        let _ = futures::future::join_all(self.tasks.drain(..)).await;
        debug!(peer = %self.peer, "connection finished");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("status", &self.status())
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// Chain status reporting in front of the caller's notifiers.
///
/// `Open` comes from the gated state-change notifier; `Closed` from the
/// closed notifier, which fires even after a protocol violation.
fn track(mut callbacks: SessionCallbacks, status: watch::Sender<LinkStatus>) -> SessionCallbacks {
    let status = Arc::new(status);
    let on_open = Arc::clone(&status);
    let user_state = callbacks.on_state_change.take();
    callbacks.on_state_change = Some(Arc::new(move |handle: SessionHandle, open: bool| {
        if open {
            let _ = on_open.send_replace(LinkStatus::Open);
        }
        if let Some(notify) = &user_state {
            notify(handle, open);
        }
    }));
    let user_closed = callbacks.on_closed.take();
    callbacks.on_closed = Some(Box::new(move |handle: SessionHandle| {
        let _ = status.send_replace(LinkStatus::Closed);
        if let Some(notify) = user_closed {
            notify(handle);
        }
    }));
    callbacks
}

/// Feed socket bytes into the session until EOF, an error, close, or
/// cancellation; then report the loss.
async fn run_reader<R>(
    mut reader: R,
    session: SessionHandle,
    chunk_size: usize,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(chunk_size);
    loop {
        buf.clear();
        buf.reserve(chunk_size);
        let read = tokio::select! {
            read = reader.read_buf(&mut buf) => read,
            () = cancel.cancelled() => break,
        };
        let Some(session) = session.upgrade() else {
            break;
        };
        match read {
            Ok(0) => {
                debug!("peer closed connection");
                break;
            }
            Ok(n) => {
                counter!(BYTES_IN_TOTAL).increment(n as u64);
                session.on_read(&buf[..n]);
                if session.state() == SessionState::Closed {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "socket read failed");
                break;
            }
        }
    }

    if let Some(session) = session.upgrade() {
        session.on_close();
    }
    cancel.cancel();
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Active side
// ─────────────────────────────────────────────────────────────────────────────

/// Connect to `settings.transport` and send HELLO.
pub async fn connect(
    settings: &WampSettings,
    credentials: ClientCredentials,
    callbacks: SessionCallbacks,
) -> Result<Connection, ConnectError> {
    let addr = (settings.transport.host.as_str(), settings.transport.port);
    let stream = TcpStream::connect(addr).await?;
    let session_settings = &settings.session;
    let connection = Connection::spawn(
        stream,
        &settings.transport,
        session_settings,
        callbacks,
        |io, callbacks| Session::active(io, credentials, session_settings, callbacks),
    )?;
    connection.session.initiate_handshake()?;
    Ok(connection)
}

/// [`connect`] and wait for the session to open.
pub async fn join(
    settings: &WampSettings,
    credentials: ClientCredentials,
    callbacks: SessionCallbacks,
) -> Result<Connection, ConnectError> {
    let mut connection = connect(settings, credentials, callbacks).await?;
    let limit = Duration::from_secs(settings.session.handshake_timeout_secs.max(1));
    match tokio::time::timeout(limit, connection.wait_open()).await {
        Ok(Ok(())) => {
            info!(
                peer = %connection.peer,
                realm = %connection.session.realm(),
                "joined realm"
            );
            Ok(connection)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => {
            connection.close();
            Err(ConnectError::HandshakeTimeout(limit))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Passive side
// ─────────────────────────────────────────────────────────────────────────────

/// Accepts TCP connections and runs a passive session on each.
pub struct Listener {
    inner: TcpListener,
    settings: WampSettings,
    auth: Arc<dyn AuthProvider>,
    router: Option<Arc<dyn ServerHandler>>,
}

impl Listener {
    /// Bind to `settings.transport`. Port `0` picks an ephemeral port.
    pub async fn bind(
        settings: &WampSettings,
        auth: Arc<dyn AuthProvider>,
        router: Option<Arc<dyn ServerHandler>>,
    ) -> std::io::Result<Self> {
        let addr = (settings.transport.host.as_str(), settings.transport.port);
        let inner = TcpListener::bind(addr).await?;
        info!(addr = %inner.local_addr()?, "listening");
        Ok(Self {
            inner,
            settings: settings.clone(),
            auth,
            router,
        })
    }

    /// Bound address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Accept one connection and start its passive session.
    pub async fn accept(&self, callbacks: SessionCallbacks) -> std::io::Result<Connection> {
        let (stream, peer) = self.inner.accept().await?;
        debug!(%peer, "accepted");
        let session_settings = &self.settings.session;
        let auth = Arc::clone(&self.auth);
        let router = self.router.clone();
        Connection::spawn(
            stream,
            &self.settings.transport,
            session_settings,
            callbacks,
            |io, callbacks| Session::passive(io, auth, router, session_settings, callbacks),
        )
    }

    /// Accept until `cancel` fires, then close every live session and wait
    /// for their sockets to finish.
    pub async fn serve(self, cancel: CancellationToken) {
        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        loop {
            tokio::select! {
                accepted = self.accept(SessionCallbacks::new()) => match accepted {
                    Ok(mut connection) => {
                        info!(peer = %connection.peer(), "peer connected");
                        let stop = cancel.clone();
                        handles.retain(|h| !h.is_finished());
                        handles.push(tokio::spawn(async move {
                            tokio::select! {
                                () = stop.cancelled() => {}
                                () = connection.wait_closed() => {}
                            }
                            let peer = connection.peer();
                            connection.shutdown().await;
                            info!(%peer, "peer disconnected");
                        }));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                () = cancel.cancelled() => break,
            }
        }
        info!(live = handles.len(), "listener stopping");
        let _ = futures::future::join_all(handles).await;
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("addr", &self.inner.local_addr().ok())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn track_reports_open_and_closed() {
        let (tx, rx) = watch::channel(LinkStatus::Connecting);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let closed = Arc::new(Mutex::new(false));
        let closed_sink = Arc::clone(&closed);
        let callbacks = track(
            SessionCallbacks::new()
                .on_state_change(move |_, open| sink.lock().push(open))
                .on_closed(move |_| *closed_sink.lock() = true),
            tx,
        );

        let notify = callbacks.on_state_change.clone().unwrap();
        notify(SessionHandle::new(), true);
        assert_eq!(*rx.borrow(), LinkStatus::Open);
        notify(SessionHandle::new(), false);
        assert_eq!(*rx.borrow(), LinkStatus::Open);

        (callbacks.on_closed.unwrap())(SessionHandle::new());
        assert_eq!(*rx.borrow(), LinkStatus::Closed);
        assert_eq!(*seen.lock(), vec![true, false]);
        assert!(*closed.lock());
    }

    #[tokio::test]
    async fn reader_reports_eof_to_session() {
        use wamp_session::testing::MockTransport;

        let io = MockTransport::new();
        let session = Session::active(
            io.boxed(),
            ClientCredentials::anonymous("r1"),
            &SessionSettings::default(),
            SessionCallbacks::new(),
        );
        let (ours, theirs) = tokio::io::duplex(64);
        drop(theirs);
        let cancel = CancellationToken::new();

        run_reader(ours, session.handle(), 16, cancel.clone()).await;

        assert_eq!(session.state(), SessionState::Closed);
        assert!(cancel.is_cancelled());
    }
}
