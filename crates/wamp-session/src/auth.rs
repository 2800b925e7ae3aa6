//! Authentication: the provider consulted by passive sessions, the
//! credentials carried by active sessions, and WAMP-CRA signing.
//!
//! A WAMP-CRA signature is `base64(HMAC-SHA256(key, challenge))`. The key is
//! the shared secret itself, or, when the challenge carries salting
//! parameters, the base64 text of `PBKDF2-HMAC-SHA256(secret, salt,
//! iterations, keylen)`.

use std::fmt;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use rand::Rng;
use serde_json::{Value, json};
use sha2::Sha256;
use wamp_core::Dict;

type HmacSha256 = Hmac<Sha256>;

/// Largest derived key accepted from a challenge.
const MAX_KEYLEN: u32 = 1024;

/// Largest PBKDF2 iteration count accepted from a challenge. Derivation runs
/// on the reading thread.
const MAX_ITERATIONS: u32 = 100_000;

// ─────────────────────────────────────────────────────────────────────────────
// Provider (passive side)
// ─────────────────────────────────────────────────────────────────────────────

/// How a realm treats a connecting user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMode {
    /// Welcome without authentication.
    Open,
    /// Challenge using one of the policy's methods.
    Authenticate,
    /// Refuse with `wamp.error.not_authorized`.
    Forbidden,
}

/// Result of [`AuthProvider::policy`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthPolicy {
    /// What to do with the user.
    pub mode: AuthMode,
    /// Methods acceptable in [`AuthMode::Authenticate`].
    pub methods: Vec<String>,
}

impl AuthPolicy {
    /// Let the user in.
    pub fn open() -> Self {
        Self {
            mode: AuthMode::Open,
            methods: Vec::new(),
        }
    }

    /// Require one of `methods`.
    pub fn authenticate<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: AuthMode::Authenticate,
            methods: methods.into_iter().map(Into::into).collect(),
        }
    }

    /// Refuse the user.
    pub fn forbidden() -> Self {
        Self {
            mode: AuthMode::Forbidden,
            methods: Vec::new(),
        }
    }
}

/// PBKDF2 parameters sent in a salted challenge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaltParams {
    /// Salt, used as raw UTF-8 bytes.
    pub salt: String,
    /// Derived key length in bytes.
    pub keylen: u32,
    /// PBKDF2 iteration count.
    pub iterations: u32,
}

impl SaltParams {
    /// Parameters with the common defaults (32-byte key, 1000 iterations).
    pub fn new(salt: impl Into<String>) -> Self {
        Self {
            salt: salt.into(),
            keylen: 32,
            iterations: 1000,
        }
    }

    /// Read `salt`, `keylen` and `iterations` from CHALLENGE extra.
    ///
    /// Returns `None` when there is no salt. Missing numbers take defaults.
    pub fn from_extra(extra: &Dict) -> Option<Self> {
        let salt = extra.get("salt")?.as_str()?;
        let defaults = Self::new(salt);
        let read = |key: &str, default: u32| {
            extra
                .get(key)
                .and_then(Value::as_u64)
                .map_or(default, |n| u32::try_from(n).unwrap_or(u32::MAX))
        };
        Some(Self {
            keylen: read("keylen", defaults.keylen),
            iterations: read("iterations", defaults.iterations),
            ..defaults
        })
    }

    /// Copy into CHALLENGE extra.
    pub fn write_extra(&self, extra: &mut Dict) {
        let _ = extra.insert("salt".into(), Value::from(self.salt.as_str()));
        let _ = extra.insert("keylen".into(), Value::from(self.keylen));
        let _ = extra.insert("iterations".into(), Value::from(self.iterations));
    }
}

/// Authentication policy consulted by passive sessions during the handshake.
///
/// Only [`policy`](Self::policy) is required. For `wampcra`, either
/// [`check_cra`](Self::check_cra) or [`user_secret`](Self::user_secret) must
/// be provided; without both, every authentication attempt fails.
pub trait AuthProvider: Send + Sync {
    /// Name reported as `authprovider`.
    fn provider_name(&self, _realm: &str) -> String {
        "static".to_string()
    }

    /// Decide how to treat `user` joining `realm`.
    fn policy(&self, user: &str, realm: &str) -> AuthPolicy;

    /// Salting parameters for the challenge, if secrets are stored salted.
    fn cra_salt(&self, _user: &str, _realm: &str, _challenge: &str) -> Option<SaltParams> {
        None
    }

    /// Verify a signature directly. `None` falls back to
    /// [`user_secret`](Self::user_secret).
    fn check_cra(
        &self,
        _user: &str,
        _realm: &str,
        _challenge: &str,
        _signature: &str,
    ) -> Option<bool> {
        None
    }

    /// Shared secret for `user`, used to compute the expected signature.
    fn user_secret(&self, _user: &str, _realm: &str) -> Option<String> {
        None
    }
}

/// Welcomes everyone.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl AuthProvider for AllowAll {
    fn provider_name(&self, _realm: &str) -> String {
        "allow_all".to_string()
    }

    fn policy(&self, _user: &str, _realm: &str) -> AuthPolicy {
        AuthPolicy::open()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Credentials (active side)
// ─────────────────────────────────────────────────────────────────────────────

/// Secret source; called once per challenge.
pub type SecretFn = Arc<dyn Fn() -> String + Send + Sync>;

/// What an active session announces in HELLO and uses to answer CHALLENGE.
#[derive(Clone)]
pub struct ClientCredentials {
    /// Realm to join.
    pub realm: String,
    /// Authentication id; empty for anonymous.
    pub authid: String,
    /// Methods offered, in preference order.
    pub authmethods: Vec<String>,
    /// Shared secret.
    pub secret: SecretFn,
}

impl ClientCredentials {
    /// Join `realm` without authenticating.
    pub fn anonymous(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            authid: String::new(),
            authmethods: Vec::new(),
            secret: Arc::new(String::new),
        }
    }

    /// Join `realm` as `authid`, offering `wampcra` with a fixed secret.
    pub fn wampcra(
        realm: impl Into<String>,
        authid: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        let secret = secret.into();
        Self {
            realm: realm.into(),
            authid: authid.into(),
            authmethods: vec![wamp_core::uri::WAMPCRA.to_string()],
            secret: Arc::new(move || secret.clone()),
        }
    }

    /// Announce `authid` without offering any method.
    #[must_use]
    pub fn with_authid(mut self, authid: impl Into<String>) -> Self {
        self.authid = authid.into();
        self
    }

    /// Fetch the secret lazily, e.g. from a keychain.
    #[must_use]
    pub fn with_secret_fn(mut self, f: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.secret = Arc::new(f);
        self
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("realm", &self.realm)
            .field("authid", &self.authid)
            .field("authmethods", &self.authmethods)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WAMP-CRA
// ─────────────────────────────────────────────────────────────────────────────

/// WAMP-CRA computation failure.
#[derive(Debug, thiserror::Error)]
pub enum CraError {
    /// HMAC rejected the key.
    #[error("invalid HMAC key: {0}")]
    Key(#[from] hmac::digest::InvalidLength),
    /// Salting parameters out of range.
    #[error("invalid salting parameters (keylen {keylen}, iterations {iterations})")]
    Salt {
        /// Requested key length.
        keylen: u32,
        /// Requested iteration count.
        iterations: u32,
    },
}

/// Derive the salted key: base64 of PBKDF2-HMAC-SHA256.
pub fn derive_key(secret: &str, params: &SaltParams) -> Result<String, CraError> {
    if params.keylen == 0
        || params.keylen > MAX_KEYLEN
        || params.iterations == 0
        || params.iterations > MAX_ITERATIONS
    {
        return Err(CraError::Salt {
            keylen: params.keylen,
            iterations: params.iterations,
        });
    }
    let mut derived = vec![0_u8; params.keylen as usize];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        secret.as_bytes(),
        params.salt.as_bytes(),
        params.iterations,
        &mut derived,
    );
    Ok(BASE64.encode(derived))
}

fn signing_key(secret: &str, salt: Option<&SaltParams>) -> Result<Vec<u8>, CraError> {
    match salt {
        Some(params) => Ok(derive_key(secret, params)?.into_bytes()),
        None => Ok(secret.as_bytes().to_vec()),
    }
}

fn mac(key: &[u8], challenge: &str) -> Result<HmacSha256, CraError> {
    let mut mac = HmacSha256::new_from_slice(key)?;
    mac.update(challenge.as_bytes());
    Ok(mac)
}

/// Sign `challenge` with `secret`.
pub fn compute_signature(
    secret: &str,
    salt: Option<&SaltParams>,
    challenge: &str,
) -> Result<String, CraError> {
    let key = signing_key(secret, salt)?;
    Ok(BASE64.encode(mac(&key, challenge)?.finalize().into_bytes()))
}

/// Check `signature` against the one `secret` would produce, in constant time.
///
/// A signature that is not valid base64 does not match.
pub fn verify_signature(
    secret: &str,
    salt: Option<&SaltParams>,
    challenge: &str,
    signature: &str,
) -> Result<bool, CraError> {
    let Ok(presented) = BASE64.decode(signature) else {
        return Ok(false);
    };
    let key = signing_key(secret, salt)?;
    Ok(mac(&key, challenge)?.verify_slice(&presented).is_ok())
}

/// Fields of a WAMP-CRA challenge.
pub(crate) struct ChallengeInfo<'a> {
    pub authid: &'a str,
    pub authrole: &'a str,
    pub provider: &'a str,
    pub session_id: u64,
}

/// Build the challenge string: a JSON object with a fresh nonce and timestamp.
pub(crate) fn build_challenge(info: &ChallengeInfo<'_>) -> String {
    let mut nonce = [0_u8; 16];
    rand::rng().fill(&mut nonce);
    let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    json!({
        "authid": info.authid,
        "authrole": info.authrole,
        "authmethod": wamp_core::uri::WAMPCRA,
        "authprovider": info.provider,
        "nonce": BASE64.encode(nonce),
        "timestamp": timestamp,
        "session": info.session_id,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_matches_rfc4231_case_2() {
        let sig = compute_signature("Jefe", None, "what do ya want for nothing?").unwrap();
        assert_eq!(sig, "W9zBRr9gdU5qBCQmCJV1x1oAPwidJzmDnexYuWTsOEM=");
    }

    #[test]
    fn unsalted_signature() {
        let sig = compute_signature("secret1", None, r#"{"nonce":"abc"}"#).unwrap();
        assert_eq!(sig, "D2Np9t2E5NKNVhM89Eza7VYzKZkkXIsSocqQXzPt2kg=");
    }

    #[test]
    fn salted_key_and_signature() {
        let params = SaltParams::new("salt123");
        assert_eq!(
            derive_key("secret2", &params).unwrap(),
            "nythvFZ7EuM5sPCQrrgnz1oJiZXUNcZZFlDIdGSiNUs="
        );
        let sig = compute_signature("secret2", Some(&params), r#"{"nonce":"abc"}"#).unwrap();
        assert_eq!(sig, "ZMPOyKcqWDwUe0OEeenahLcFhEj2t4Skkdih5fJgspw=");
    }

    #[test]
    fn verify_accepts_own_signature_only() {
        let challenge = r#"{"nonce":"xyz"}"#;
        let sig = compute_signature("s3cret", None, challenge).unwrap();
        assert!(verify_signature("s3cret", None, challenge, &sig).unwrap());
        assert!(!verify_signature("other", None, challenge, &sig).unwrap());
        assert!(!verify_signature("s3cret", None, "different", &sig).unwrap());
        assert!(!verify_signature("s3cret", None, challenge, "not base64!").unwrap());
    }

    #[test]
    fn bad_salt_params_rejected() {
        let mut params = SaltParams::new("s");
        params.iterations = 0;
        assert!(matches!(
            derive_key("x", &params),
            Err(CraError::Salt { iterations: 0, .. })
        ));
        params.iterations = 10;
        params.keylen = MAX_KEYLEN + 1;
        assert!(derive_key("x", &params).is_err());
    }

    #[test]
    fn excessive_iterations_rejected() {
        let mut extra = Dict::new();
        let _ = extra.insert("salt".into(), Value::from("s"));
        let _ = extra.insert("iterations".into(), Value::from(u32::MAX));
        let params = SaltParams::from_extra(&extra).unwrap();
        assert_eq!(params.iterations, u32::MAX);
        assert!(matches!(
            derive_key("x", &params),
            Err(CraError::Salt { iterations: u32::MAX, .. })
        ));
        assert!(compute_signature("x", Some(&params), "challenge").is_err());

        let mut params = SaltParams::new("s");
        params.iterations = MAX_ITERATIONS + 1;
        assert!(derive_key("x", &params).is_err());
    }

    #[test]
    fn salt_params_extra_roundtrip() {
        let mut extra = Dict::new();
        assert_eq!(SaltParams::from_extra(&extra), None);

        let params = SaltParams {
            salt: "pepper".into(),
            keylen: 16,
            iterations: 50,
        };
        params.write_extra(&mut extra);
        assert_eq!(SaltParams::from_extra(&extra), Some(params));
    }

    #[test]
    fn salt_params_defaults_when_numbers_missing() {
        let mut extra = Dict::new();
        let _ = extra.insert("salt".into(), Value::from("abc"));
        let params = SaltParams::from_extra(&extra).unwrap();
        assert_eq!(params.keylen, 32);
        assert_eq!(params.iterations, 1000);
    }

    #[test]
    fn challenge_is_json_with_fresh_nonce() {
        let info = ChallengeInfo {
            authid: "bob",
            authrole: "user",
            provider: "static",
            session_id: 42,
        };
        let a: Value = serde_json::from_str(&build_challenge(&info)).unwrap();
        let b: Value = serde_json::from_str(&build_challenge(&info)).unwrap();
        assert_eq!(a["authid"], "bob");
        assert_eq!(a["authmethod"], "wampcra");
        assert_eq!(a["authprovider"], "static");
        assert_eq!(a["session"], 42);
        assert!(a["timestamp"].as_str().unwrap().ends_with('Z'));
        assert_ne!(a["nonce"], b["nonce"]);
    }

    #[test]
    fn policy_constructors() {
        assert_eq!(AuthPolicy::open().mode, AuthMode::Open);
        assert_eq!(AuthPolicy::forbidden().mode, AuthMode::Forbidden);
        let p = AuthPolicy::authenticate(["wampcra", "ticket"]);
        assert_eq!(p.mode, AuthMode::Authenticate);
        assert_eq!(p.methods, vec!["wampcra", "ticket"]);
        assert_eq!(AllowAll.policy("anyone", "any").mode, AuthMode::Open);
    }

    #[test]
    fn credentials_debug_hides_secret() {
        let creds = ClientCredentials::wampcra("r2", "bob", "hunter2");
        let s = format!("{creds:?}");
        assert!(s.contains("bob"));
        assert!(!s.contains("hunter2"));
        assert_eq!((creds.secret)(), "hunter2");
        assert_eq!(creds.authmethods, vec!["wampcra"]);
    }
}
