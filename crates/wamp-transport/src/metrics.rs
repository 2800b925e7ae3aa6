//! Metric names recorded by the transport.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding application installs a recorder.

/// TCP connections opened, both directions (counter).
pub const CONNECTIONS_TOTAL: &str = "wamp_connections_total";
/// Connections whose reader is still running (gauge).
pub const CONNECTIONS_ACTIVE: &str = "wamp_connections_active";
/// Bytes read from sockets (counter).
pub const BYTES_IN_TOTAL: &str = "wamp_bytes_in_total";
/// Bytes written to sockets (counter).
pub const BYTES_OUT_TOTAL: &str = "wamp_bytes_out_total";
/// Sessions closed for missing heartbeats (counter).
pub const HEARTBEAT_TIMEOUTS_TOTAL: &str = "wamp_heartbeat_timeouts_total";
/// Sessions closed for not completing the handshake in time (counter).
pub const HANDSHAKE_TIMEOUTS_TOTAL: &str = "wamp_handshake_timeouts_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_prefixed_snake_case() {
        let names = [
            CONNECTIONS_TOTAL,
            CONNECTIONS_ACTIVE,
            BYTES_IN_TOTAL,
            BYTES_OUT_TOTAL,
            HEARTBEAT_TIMEOUTS_TOTAL,
            HANDSHAKE_TIMEOUTS_TOTAL,
        ];
        for name in names {
            assert!(name.starts_with("wamp_"), "{name}");
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "{name}"
            );
        }
    }
}
