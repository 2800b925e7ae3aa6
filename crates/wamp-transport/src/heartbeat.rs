//! Heartbeat and handshake-deadline drivers.

use std::time::Duration;

use metrics::counter;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use wamp_session::{SessionHandle, SessionState};

use crate::metrics::{HANDSHAKE_TIMEOUTS_TOTAL, HEARTBEAT_TIMEOUTS_TOTAL};

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// Nothing arrived from the peer within the timeout; the session was
    /// closed.
    TimedOut,
    /// The session closed or was dropped.
    SessionClosed,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Send HEARTBEAT every `interval` while the session is open.
///
/// Each tick first checks how long ago the last inbound frame arrived; once
/// that exceeds `timeout` the session is closed and
/// [`HeartbeatResult::TimedOut`] is returned. Ticks during the handshake are
/// skipped.
pub async fn run_heartbeat(
    session: SessionHandle,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticker = time::interval(interval);
    // Skip the immediate first tick
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(session) = session.upgrade() else {
                    return HeartbeatResult::SessionClosed;
                };
                match session.state() {
                    SessionState::Open => {}
                    state if state.is_terminating() => return HeartbeatResult::SessionClosed,
                    _ => continue,
                }
                let silent = session.duration_since_last_message();
                if silent > timeout {
                    warn!(silent_secs = silent.as_secs(), "peer unresponsive, closing session");
                    counter!(HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
                    session.close();
                    return HeartbeatResult::TimedOut;
                }
                if let Err(e) = session.send_heartbeat() {
                    debug!(error = %e, "heartbeat not sent");
                    return HeartbeatResult::SessionClosed;
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}

/// Close the session if it has not opened within `limit`.
///
/// Returns `true` when the deadline fired.
pub async fn handshake_deadline(
    session: SessionHandle,
    limit: Duration,
    cancel: CancellationToken,
) -> bool {
    tokio::select! {
        () = time::sleep(limit) => {}
        () = cancel.cancelled() => return false,
    }
    let Some(session) = session.upgrade() else {
        return false;
    };
    if !session.is_pending_open() {
        return false;
    }
    warn!(limit_secs = limit.as_secs(), state = %session.state(), "handshake timed out");
    counter!(HANDSHAKE_TIMEOUTS_TOTAL).increment(1);
    session.close();
    true
}
