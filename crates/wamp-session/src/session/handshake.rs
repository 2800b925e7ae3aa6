//! HELLO / CHALLENGE / AUTHENTICATE / WELCOME / ABORT for both roles.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use rand::Rng;
use serde_json::Value;
use tracing::{info, warn};
use wamp_core::{Dict, Message, uri};

use super::{Session, Teardown};
use crate::auth::{
    AuthMode, AuthProvider, ChallengeInfo, SaltParams, build_challenge, compute_signature,
    verify_signature,
};
use crate::errors::SessionError;
use crate::state::SessionState;

/// Protocol ids are drawn from `[1, 2^53]`.
const MAX_PROTOCOL_ID: u64 = 1 << 53;

const AUTHROLE: &str = "user";

/// Handshake material held between HELLO and WELCOME.
#[derive(Default)]
pub(super) struct HandshakeData {
    authid: String,
    challenge: Option<PendingChallenge>,
}

struct PendingChallenge {
    challenge: String,
    salt: Option<SaltParams>,
}

impl HandshakeData {
    pub(super) fn clear(&mut self) {
        self.challenge = None;
    }
}

fn roles(names: &[&str]) -> Value {
    Value::Object(
        names
            .iter()
            .map(|name| ((*name).to_string(), Value::Object(Dict::new())))
            .collect(),
    )
}

impl Session {
    /// Send HELLO. Only valid for an active session in `Init`.
    pub fn initiate_handshake(&self) -> Result<(), SessionError> {
        let _span = self.span.enter();
        let creds = self.credentials.as_ref().ok_or(SessionError::NotActive)?;

        let mut details = Dict::new();
        let _ = details.insert(
            "roles".into(),
            roles(&["caller", "callee", "publisher", "subscriber"]),
        );
        let _ = details.insert("agent".into(), Value::from(self.settings.agent.as_str()));
        if !creds.authid.is_empty() {
            let _ = details.insert("authid".into(), Value::from(creds.authid.as_str()));
        }
        if !creds.authmethods.is_empty() {
            let _ = details.insert("authmethods".into(), Value::from(creds.authmethods.clone()));
        }

        let frame = self.encode(&Message::Hello {
            realm: creds.realm.clone(),
            details,
        })?;
        self.transition(SessionState::Init, SessionState::SentHello)?;
        if let Err(e) = self.write_frame(frame) {
            self.shutdown(Teardown::Local);
            return Err(e);
        }
        info!(realm = %creds.realm, "HELLO sent");
        Ok(())
    }

    /// Route a handshake message; the dispatcher has already checked that
    /// `message` is legal in `state`.
    pub(super) fn handle_handshake(
        &self,
        state: SessionState,
        message: Message,
    ) -> Result<(), SessionError> {
        match message {
            Message::Hello { realm, details } => self.on_hello(realm, &details),
            Message::Welcome {
                session_id,
                details: _,
            } => self.on_welcome(state, session_id),
            Message::Challenge { auth_method, extra } => self.on_challenge(&auth_method, &extra),
            Message::Authenticate { signature, .. } => self.on_authenticate(&signature),
            Message::Abort { reason, details } => {
                let message = details.get("message").and_then(Value::as_str);
                info!(%reason, detail = message, "handshake aborted by peer");
                self.shutdown(Teardown::Local);
                Ok(())
            }
            other => Err(SessionError::Protocol(format!(
                "{} during handshake",
                other.message_type()
            ))),
        }
    }

    fn auth_provider(&self) -> Result<Arc<dyn AuthProvider>, SessionError> {
        self.auth
            .clone()
            .ok_or_else(|| SessionError::Protocol("no authentication provider".into()))
    }

    /// Send ABORT and close.
    fn abort_handshake(&self, reason: &str, message: &str) {
        warn!(reason, detail = message, "aborting handshake");
        self.send_quietly(&Message::abort(reason, message));
        self.shutdown(Teardown::Local);
    }

    // ── Passive side ────────────────────────────────────────────────────

    fn on_hello(&self, realm: String, details: &Dict) -> Result<(), SessionError> {
        self.transition(SessionState::Init, SessionState::RecvHello)?;
        if realm.is_empty() {
            self.abort_handshake(uri::NO_SUCH_REALM, "realm must not be empty");
            return Ok(());
        }
        let _ = self.realm.set(realm.clone());

        let authid = details
            .get("authid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let offered: Vec<&str> = details
            .get("authmethods")
            .and_then(Value::as_array)
            .map(|methods| methods.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let session_id = rand::rng().random_range(1..=MAX_PROTOCOL_ID);
        self.wamp_session_id.store(session_id, Ordering::Release);
        self.handshake.lock().authid.clone_from(&authid);

        let auth = self.auth_provider()?;
        let policy = auth.policy(&authid, &realm);
        info!(%realm, %authid, mode = ?policy.mode, "HELLO received");

        match policy.mode {
            AuthMode::Open => self.welcome(SessionState::RecvHello, None),
            AuthMode::Forbidden => {
                self.abort_handshake(uri::NOT_AUTHORIZED, "user not permitted in realm");
                Ok(())
            }
            AuthMode::Authenticate => {
                let acceptable = offered
                    .iter()
                    .any(|m| *m == uri::WAMPCRA && policy.methods.iter().any(|p| p == m));
                if !acceptable {
                    self.abort_handshake(uri::NO_AUTH_METHOD, "no acceptable auth method");
                    return Ok(());
                }

                let provider = auth.provider_name(&realm);
                let challenge = build_challenge(&ChallengeInfo {
                    authid: &authid,
                    authrole: AUTHROLE,
                    provider: &provider,
                    session_id,
                });
                let salt = auth.cra_salt(&authid, &realm, &challenge);

                let mut extra = Dict::new();
                let _ = extra.insert("challenge".into(), Value::from(challenge.as_str()));
                if let Some(salt) = &salt {
                    salt.write_extra(&mut extra);
                }
                let frame = self.encode(&Message::Challenge {
                    auth_method: uri::WAMPCRA.to_string(),
                    extra,
                })?;

                self.handshake.lock().challenge = Some(PendingChallenge { challenge, salt });
                self.transition(SessionState::RecvHello, SessionState::SentChallenge)?;
                self.write_frame(frame)
            }
        }
    }

    fn on_authenticate(&self, signature: &str) -> Result<(), SessionError> {
        self.transition(SessionState::SentChallenge, SessionState::RecvAuth)?;
        let (authid, pending) = {
            let mut hs = self.handshake.lock();
            (hs.authid.clone(), hs.challenge.take())
        };
        let pending = pending.ok_or_else(|| {
            SessionError::Protocol("AUTHENTICATE without outstanding challenge".into())
        })?;

        let auth = self.auth_provider()?;
        let realm = self.realm().to_string();
        let verified = match auth.check_cra(&authid, &realm, &pending.challenge, signature) {
            Some(verdict) => verdict,
            None => match auth.user_secret(&authid, &realm) {
                Some(secret) => verify_signature(
                    &secret,
                    pending.salt.as_ref(),
                    &pending.challenge,
                    signature,
                )
                .unwrap_or_else(|e| {
                    warn!(error = %e, "cannot compute expected signature");
                    false
                }),
                None => {
                    warn!(%authid, "no secret to verify signature against");
                    false
                }
            },
        };

        if verified {
            let provider = auth.provider_name(&realm);
            self.welcome(SessionState::RecvAuth, Some((&authid, &provider)))
        } else {
            self.abort_handshake(uri::AUTHENTICATION_FAILED, "signature mismatch");
            Ok(())
        }
    }

    /// Send WELCOME and open. `authenticated` carries `(authid, provider)`.
    fn welcome(
        &self,
        from: SessionState,
        authenticated: Option<(&str, &str)>,
    ) -> Result<(), SessionError> {
        let mut details = Dict::new();
        let _ = details.insert("roles".into(), roles(&["broker", "dealer"]));
        let _ = details.insert("agent".into(), Value::from(self.settings.agent.as_str()));
        if let Some((authid, provider)) = authenticated {
            let _ = details.insert("authid".into(), Value::from(authid));
            let _ = details.insert("authrole".into(), Value::from(AUTHROLE));
            let _ = details.insert("authmethod".into(), Value::from(uri::WAMPCRA));
            let _ = details.insert("authprovider".into(), Value::from(provider));
        }
        let session_id = self.wamp_session_id.load(Ordering::Acquire);
        let frame = self.encode(&Message::Welcome {
            session_id,
            details,
        })?;

        self.transition(from, SessionState::Open)?;
        self.write_frame(frame)?;
        info!(session_id, realm = %self.realm(), "session open");
        self.notify_state(true);
        Ok(())
    }

    // ── Active side ─────────────────────────────────────────────────────

    fn on_welcome(&self, state: SessionState, session_id: u64) -> Result<(), SessionError> {
        self.wamp_session_id.store(session_id, Ordering::Release);
        self.handshake.lock().clear();
        self.transition(state, SessionState::Open)?;
        info!(session_id, realm = %self.realm(), "session open");
        self.notify_state(true);
        Ok(())
    }

    fn on_challenge(&self, auth_method: &str, extra: &Dict) -> Result<(), SessionError> {
        self.transition(SessionState::SentHello, SessionState::RecvChallenge)?;
        let creds = self.credentials.as_ref().ok_or(SessionError::NotActive)?;

        let offered = creds.authmethods.iter().any(|m| m == uri::WAMPCRA);
        if auth_method != uri::WAMPCRA || !offered {
            self.abort_handshake(uri::NO_AUTH_METHOD, "unsupported challenge method");
            return Ok(());
        }
        let challenge = extra
            .get("challenge")
            .and_then(Value::as_str)
            .ok_or_else(|| SessionError::Protocol("CHALLENGE without challenge string".into()))?;
        let salt = SaltParams::from_extra(extra);

        let signature = match compute_signature(&(creds.secret)(), salt.as_ref(), challenge) {
            Ok(signature) => signature,
            Err(e) => {
                self.abort_handshake(uri::AUTHENTICATION_FAILED, &e.to_string());
                return Ok(());
            }
        };
        let frame = self.encode(&Message::Authenticate {
            signature,
            extra: Dict::new(),
        })?;
        self.transition(SessionState::RecvChallenge, SessionState::SentAuth)?;
        self.write_frame(frame)?;
        info!(salted = salt.is_some(), "AUTHENTICATE sent");
        Ok(())
    }
}
