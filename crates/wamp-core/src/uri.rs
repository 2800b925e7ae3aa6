//! Well-known error and close reason URIs.

// ── Error URIs ──────────────────────────────────────────────────────

/// Peer sent a malformed frame or a message that is illegal in the current state.
pub const PROTOCOL_VIOLATION: &str = "wamp.error.protocol_violation";
/// Authentication policy refused the user for the realm.
pub const NOT_AUTHORIZED: &str = "wamp.error.not_authorized";
/// Challenge/response signature did not verify.
pub const AUTHENTICATION_FAILED: &str = "wamp.error.authentication_failed";
/// No authentication method offered by the client is acceptable.
pub const NO_AUTH_METHOD: &str = "wamp.error.no_auth_method";
/// Realm is missing or unknown.
pub const NO_SUCH_REALM: &str = "wamp.error.no_such_realm";
/// Called procedure has no registration.
pub const NO_SUCH_PROCEDURE: &str = "wamp.error.no_such_procedure";
/// Invocation or unregister named an unknown registration id.
pub const NO_SUCH_REGISTRATION: &str = "wamp.error.no_such_registration";
/// Unsubscribe named an unknown subscription id.
pub const NO_SUCH_SUBSCRIPTION: &str = "wamp.error.no_such_subscription";
/// Procedure already registered by another callee.
pub const PROCEDURE_ALREADY_EXISTS: &str = "wamp.error.procedure_already_exists";
/// Arguments did not match what the callee expects.
pub const INVALID_ARGUMENT: &str = "wamp.error.invalid_argument";
/// The request was pending when the session closed.
pub const SESSION_CLOSED: &str = "wamp.error.session_closed";

// ── Close reasons ───────────────────────────────────────────────────

/// GOODBYE reason sent by the side that initiates a graceful close.
pub const CLOSE_REALM: &str = "wamp.close.close_realm";
/// GOODBYE reason sent in reply to a peer's GOODBYE.
pub const GOODBYE_AND_OUT: &str = "wamp.close.goodbye_and_out";
/// ABORT reason when the local side shuts down mid-handshake.
pub const SYSTEM_SHUTDOWN: &str = "wamp.close.system_shutdown";

// ── Authentication ──────────────────────────────────────────────────

/// The only challenge/response method this workspace implements.
pub const WAMPCRA: &str = "wampcra";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_uris_share_prefix() {
        for uri in [
            PROTOCOL_VIOLATION,
            NOT_AUTHORIZED,
            AUTHENTICATION_FAILED,
            NO_AUTH_METHOD,
            NO_SUCH_REALM,
            NO_SUCH_PROCEDURE,
            NO_SUCH_REGISTRATION,
            NO_SUCH_SUBSCRIPTION,
            PROCEDURE_ALREADY_EXISTS,
            INVALID_ARGUMENT,
            SESSION_CLOSED,
        ] {
            assert!(uri.starts_with("wamp.error."), "{uri}");
        }
    }

    #[test]
    fn close_reasons_share_prefix() {
        for uri in [CLOSE_REALM, GOODBYE_AND_OUT, SYSTEM_SHUTDOWN] {
            assert!(uri.starts_with("wamp.close."), "{uri}");
        }
    }
}
