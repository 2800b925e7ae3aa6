//! Socket write side: the [`IoHandle`] a session writes through.

use std::net::SocketAddr;

use bytes::Bytes;
use metrics::counter;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use wamp_session::{IoHandle, TransportError};

use crate::metrics::BYTES_OUT_TOTAL;

/// Command for the writer task.
#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(Bytes),
    Close,
}

/// Write half of a TCP connection as seen by a session.
///
/// Frames are queued on an unbounded channel and written in order by a
/// dedicated task. `close` is queued too, so frames written before it are
/// flushed first.
pub struct TcpHandle {
    peer: SocketAddr,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl TcpHandle {
    pub(crate) fn new(peer: SocketAddr, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { peer, tx }
    }

    /// Remote address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl IoHandle for TcpHandle {
    fn write(&self, frame: Bytes) -> Result<(), TransportError> {
        self.tx
            .send(Outbound::Frame(frame))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

/// Write queued frames until `Close`, a write error, or every handle is
/// gone. Shuts the socket down and cancels `done` on the way out.
pub(crate) async fn run_writer<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    done: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(command) = rx.recv().await {
        match command {
            Outbound::Frame(frame) => {
                if let Err(e) = writer.write_all(&frame).await {
                    debug!(error = %e, "socket write failed");
                    break;
                }
                counter!(BYTES_OUT_TOTAL).increment(frame.len() as u64);
            }
            Outbound::Close => {
                debug!("closing socket");
                break;
            }
        }
    }
    let _ = writer.shutdown().await;
    done.cancel();
}
