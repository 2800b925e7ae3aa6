//! In-memory transport for driving sessions without sockets.
//!
//! [`MockTransport`] records every frame a session writes. A [`Link`] wires
//! two sessions back to back and [`pump`] shuttles bytes between them until
//! neither side has anything left to say, so handshakes and RPC exchanges
//! run synchronously on the test thread.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio_util::codec::Decoder;
use wamp_core::{CodecError, FrameCodec, Message, MessageType};

use crate::errors::TransportError;
use crate::session::Session;
use crate::state::SessionState;
use crate::transport::IoHandle;

/// Upper bound on pump rounds; a livelocked exchange stops here.
const MAX_PUMP_ROUNDS: usize = 1000;

#[derive(Default)]
struct MockState {
    outbox: BytesMut,
    sent: Vec<Message>,
    closed: bool,
    fail_writes: bool,
}

/// Recording [`IoHandle`]. Clones share the same state.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Fresh, open transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Boxed handle for a session factory.
    pub fn boxed(&self) -> Box<dyn IoHandle> {
        Box::new(self.clone())
    }

    /// Every message written so far.
    pub fn sent(&self) -> Vec<Message> {
        self.inner.lock().sent.clone()
    }

    /// Types of every message written so far.
    pub fn sent_types(&self) -> Vec<MessageType> {
        self.inner
            .lock()
            .sent
            .iter()
            .map(Message::message_type)
            .collect()
    }

    /// Most recent message written.
    pub fn last_sent(&self) -> Option<Message> {
        self.inner.lock().sent.last().cloned()
    }

    /// Bytes written since the last call.
    pub fn take_outbox(&self) -> Bytes {
        self.inner.lock().outbox.split().freeze()
    }

    /// Whether the session closed this transport.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Make subsequent writes fail as if the connection broke.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }
}

impl IoHandle for MockTransport {
    fn write(&self, frame: Bytes) -> Result<(), TransportError> {
        let mut state = self.inner.lock();
        if state.closed || state.fail_writes {
            return Err(TransportError::Closed);
        }
        let mut copy = BytesMut::from(&frame[..]);
        if let Ok(Some(values)) = FrameCodec::default().decode(&mut copy) {
            if let Ok(message) = Message::decode(&values) {
                state.sent.push(message);
            }
        }
        state.outbox.extend_from_slice(&frame);
        Ok(())
    }

    fn close(&self) {
        self.inner.lock().closed = true;
    }
}

/// Encode `message` as one frame.
pub fn frame(message: &Message) -> Result<Bytes, CodecError> {
    FrameCodec::default().encode_message(message)
}

/// Frame arbitrary payload text, valid or not.
pub fn raw_frame(payload: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(u32::try_from(payload.len()).unwrap_or(u32::MAX));
    buf.put_slice(payload.as_bytes());
    buf.freeze()
}

/// Two sessions connected through mock transports.
pub struct Link {
    a: Arc<Session>,
    a_io: MockTransport,
    b: Arc<Session>,
    b_io: MockTransport,
}

impl Link {
    /// Wire `a` (writing to `a_io`) to `b` (writing to `b_io`).
    pub fn new(a: &Arc<Session>, a_io: &MockTransport, b: &Arc<Session>, b_io: &MockTransport) -> Self {
        Self {
            a: Arc::clone(a),
            a_io: a_io.clone(),
            b: Arc::clone(b),
            b_io: b_io.clone(),
        }
    }

    /// Deliver pending bytes both ways, then propagate a closed transport
    /// to the other side. Returns whether anything moved.
    pub fn pump_once(&self) -> bool {
        let mut moved = false;
        let out = self.a_io.take_outbox();
        if !out.is_empty() {
            self.b.on_read(&out);
            moved = true;
        }
        let out = self.b_io.take_outbox();
        if !out.is_empty() {
            self.a.on_read(&out);
            moved = true;
        }
        if self.a_io.is_closed() && self.b.state() != SessionState::Closed {
            self.b.on_close();
            moved = true;
        }
        if self.b_io.is_closed() && self.a.state() != SessionState::Closed {
            self.a.on_close();
            moved = true;
        }
        moved
    }

    /// Pump this link alone until quiet.
    pub fn pump(&self) -> usize {
        pump(&[self])
    }
}

/// Pump every link until none moves. Returns the number of rounds.
pub fn pump(links: &[&Link]) -> usize {
    let mut rounds = 0;
    while rounds < MAX_PUMP_ROUNDS {
        let mut moved = false;
        for link in links {
            moved |= link.pump_once();
        }
        if !moved {
            break;
        }
        rounds += 1;
    }
    rounds
}
