//! Settings type definitions.
//!
//! Field names are camelCase in JSON. Every type implements [`Default`] and
//! is `#[serde(default)]`, so partial files are accepted.

use serde::{Deserialize, Serialize};

/// Root settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WampSettings {
    /// Per-session protocol settings.
    pub session: SessionSettings,
    /// TCP transport settings.
    pub transport: TransportSettings,
    /// Logging output.
    pub logging: LoggingSettings,
}

/// Per-session protocol settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Interval between HEARTBEAT frames; `0` disables heartbeats.
    pub heartbeat_interval_secs: u64,
    /// Close the session when nothing arrived for this long.
    pub heartbeat_timeout_secs: u64,
    /// Close a session that has not opened within this long.
    pub handshake_timeout_secs: u64,
    /// Upper bound on one frame's JSON payload.
    pub max_frame_len: usize,
    /// Value of the `agent` detail in HELLO and WELCOME.
    pub agent: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            handshake_timeout_secs: 30,
            max_frame_len: 16 * 1024 * 1024, // 16 MB
            agent: concat!("wamp-session/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl SessionSettings {
    /// Whether heartbeats are enabled.
    pub fn uses_heartbeats(&self) -> bool {
        self.heartbeat_interval_secs > 0
    }
}

/// TCP transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// Address to bind or connect to.
    pub host: String,
    /// Port to bind or connect to (`0` binds an ephemeral port).
    pub port: u16,
    /// Set `TCP_NODELAY` on sockets.
    pub nodelay: bool,
    /// Size of each socket read.
    pub read_chunk_size: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 55555,
            nodelay: true,
            read_chunk_size: 8 * 1024,
        }
    }
}

/// Logging output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}
