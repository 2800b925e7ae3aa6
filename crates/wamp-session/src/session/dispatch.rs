//! Inbound path: bytes to frames, frames to messages, messages to handlers.

use serde_json::Value;
use tokio_util::codec::Decoder;
use tracing::{debug, trace, warn};
use wamp_core::{CodecError, Message, uri};

use super::{Session, Teardown};
use crate::errors::SessionError;
use crate::state::SessionState;

impl Session {
    /// Feed bytes received from the transport.
    ///
    /// Complete frames are dispatched in arrival order; a partial frame stays
    /// buffered for the next call. Ignored once the session is closed.
    pub fn on_read(&self, data: &[u8]) {
        let _span = self.span.enter();
        if self.state() == SessionState::Closed {
            trace!(len = data.len(), "ignoring bytes after close");
            return;
        }

        let (frames, failure) = self.extract_frames(data);
        for frame in &frames {
            if self.state().is_terminating() {
                debug!(dropped = frames.len(), "dropping frames after close");
                return;
            }
            self.dispatch_frame(frame);
        }
        if let Some(e) = failure {
            if !self.state().is_terminating() {
                self.protocol_violation(&e.to_string());
            }
        }
    }

    /// The transport lost its connection.
    pub fn on_close(&self) {
        let _span = self.span.enter();
        debug!("transport closed");
        self.shutdown(Teardown::TransportLost);
    }

    /// Append `data` and split off every complete frame. Runs under the
    /// read-buffer lock only; nothing is dispatched here.
    fn extract_frames(&self, data: &[u8]) -> (Vec<Vec<Value>>, Option<CodecError>) {
        let mut buf = self.read_buf.lock();
        buf.extend_from_slice(data);
        let mut codec = self.codec;
        let mut frames = Vec::new();
        loop {
            match codec.decode(&mut buf) {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => return (frames, None),
                Err(e) => {
                    buf.clear();
                    return (frames, Some(e));
                }
            }
        }
    }

    fn dispatch_frame(&self, frame: &[Value]) {
        let message = match Message::decode(frame) {
            Ok(message) => message,
            Err(e) => return self.protocol_violation(&e.to_string()),
        };
        let kind = message.message_type();
        let state = self.state();
        if state.is_terminating() {
            debug!(%kind, %state, "dropping frame");
            return;
        }
        if !state.permits(self.role, kind) {
            return self.protocol_violation(&format!("{kind} not allowed in state {state}"));
        }

        self.touch();
        debug!(%kind, "frame received");

        let outcome = if state == SessionState::Open {
            self.handle_open(message)
        } else {
            self.handle_handshake(state, message)
        };
        if let Err(e) = outcome {
            self.handle_failure(e);
        }
    }

    fn handle_failure(&self, error: SessionError) {
        match error {
            SessionError::Closed => debug!("session closed while handling frame"),
            SessionError::Transport(e) => {
                warn!(error = %e, "transport write failed");
                self.shutdown(Teardown::Local);
            }
            other => self.protocol_violation(&other.to_string()),
        }
    }

    /// Malformed or illegal input: ABORT if still writable, then close.
    ///
    /// The gate is disabled first, so only the closed notifier fires from
    /// here on.
    pub(super) fn protocol_violation(&self, detail: &str) {
        warn!(detail, state = %self.state(), "protocol violation");
        self.gate.disable();
        self.send_quietly(&Message::abort(uri::PROTOCOL_VIOLATION, detail));
        self.shutdown(Teardown::Local);
    }
}
