//! # wamp-peer
//!
//! Small WAMP peer over TCP: `listen` runs a single-realm echo router,
//! `call` joins a realm, calls one procedure and prints the result.

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::info;
use wamp_core::{Dict, WampArgs, uri};
use wamp_session::{
    AuthPolicy, AuthProvider, ClientCredentials, ErrorReply, Reply, ServerHandler, Session,
    SessionCallbacks,
};
use wamp_settings::WampSettings;
use wamp_transport::{Listener, join};

/// WAMP peer over TCP.
#[derive(Parser, Debug)]
#[command(name = "wamp-peer", about = "WAMP peer over TCP")]
struct Cli {
    /// Settings file (defaults to `~/.wamp/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind or connect to.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind or connect to.
    #[arg(long)]
    port: Option<u16>,

    /// Log filter when `RUST_LOG` is unset.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept peers for one realm; every call is echoed back.
    Listen {
        /// Realm to serve.
        #[arg(long, default_value = "realm1")]
        realm: String,
        /// Require WAMP-CRA for this user (`authid:secret`).
        #[arg(long)]
        user: Vec<String>,
    },
    /// Join a realm and call a procedure.
    Call {
        /// Realm to join.
        #[arg(long, default_value = "realm1")]
        realm: String,
        /// Authentication id.
        #[arg(long)]
        authid: Option<String>,
        /// Shared secret; enables WAMP-CRA.
        #[arg(long, env = "WAMP_SECRET")]
        secret: Option<String>,
        /// Procedure uri.
        procedure: String,
        /// Positional arguments, parsed as JSON where possible.
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => wamp_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings: {}", path.display()))?,
        None => wamp_settings::load_settings().context("Failed to load settings")?,
    };
    if let Some(host) = cli.host {
        settings.transport.host = host;
    }
    if let Some(port) = cli.port {
        settings.transport.port = port;
    }
    init_logging(&settings, cli.log_level.as_deref());

    match cli.command {
        Command::Listen { realm, user } => listen(&settings, realm, &user).await,
        Command::Call {
            realm,
            authid,
            secret,
            procedure,
            args,
        } => call(&settings, realm, authid, secret, procedure, &args).await,
    }
}

fn init_logging(settings: &WampSettings, level: Option<&str>) {
    let level = level.unwrap_or(&settings.logging.level);
    if settings.logging.json {
        wamp_core::logging::init_json_subscriber(level);
    } else {
        wamp_core::logging::init_subscriber(level);
    }
}

// ── listen ──────────────────────────────────────────────────────────────

/// Open for one realm, WAMP-CRA for configured users.
struct RealmAuth {
    realm: String,
    users: HashMap<String, String>,
}

impl AuthProvider for RealmAuth {
    fn provider_name(&self, _realm: &str) -> String {
        "wamp-peer".to_string()
    }

    fn policy(&self, user: &str, realm: &str) -> AuthPolicy {
        if realm != self.realm {
            AuthPolicy::forbidden()
        } else if self.users.contains_key(user) {
            AuthPolicy::authenticate([uri::WAMPCRA])
        } else {
            AuthPolicy::open()
        }
    }

    fn user_secret(&self, user: &str, _realm: &str) -> Option<String> {
        self.users.get(user).cloned()
    }
}

/// Echoes every call; accepts subscriptions and publications but routes
/// nothing between peers.
#[derive(Default)]
struct EchoRouter {
    next_id: AtomicU64,
}

impl EchoRouter {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl ServerHandler for EchoRouter {
    fn inbound_call(
        &self,
        session: &Session,
        procedure: &str,
        _options: Dict,
        args: WampArgs,
        reply: Reply,
    ) {
        info!(session = session.unique_id(), procedure, "echo");
        reply.result(args);
    }

    fn inbound_publish(
        &self,
        _session: &Session,
        topic: &str,
        _options: &Dict,
        _args: WampArgs,
    ) -> Result<u64, ErrorReply> {
        let id = rand::random_range(1..=1_u64 << 53);
        info!(topic, publication = id, "published");
        Ok(id)
    }

    fn inbound_subscribe(
        &self,
        _session: &Session,
        _topic: &str,
        _options: &Dict,
    ) -> Result<u64, ErrorReply> {
        Ok(self.next_id())
    }

    fn inbound_unsubscribe(
        &self,
        _session: &Session,
        _subscription_id: u64,
    ) -> Result<(), ErrorReply> {
        Ok(())
    }
}

fn parse_users(users: &[String]) -> Result<HashMap<String, String>> {
    users
        .iter()
        .map(|entry| match entry.split_once(':') {
            Some((authid, secret)) if !authid.is_empty() => {
                Ok((authid.to_string(), secret.to_string()))
            }
            _ => bail!("invalid --user {entry:?}, expected authid:secret"),
        })
        .collect()
}

async fn listen(settings: &WampSettings, realm: String, users: &[String]) -> Result<()> {
    let auth = Arc::new(RealmAuth {
        realm,
        users: parse_users(users)?,
    });
    let router: Arc<dyn ServerHandler> = Arc::new(EchoRouter::default());
    let listener = Listener::bind(settings, auth, Some(router))
        .await
        .context("Failed to bind listener")?;
    println!("listening on {}", listener.local_addr()?);

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    let _ = tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        stop.cancel();
    });
    listener.serve(cancel).await;
    Ok(())
}

// ── call ────────────────────────────────────────────────────────────────

fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

async fn call(
    settings: &WampSettings,
    realm: String,
    authid: Option<String>,
    secret: Option<String>,
    procedure: String,
    args: &[String],
) -> Result<()> {
    let credentials = match (authid, secret) {
        (Some(authid), Some(secret)) => ClientCredentials::wampcra(realm, authid, secret),
        (Some(authid), None) => ClientCredentials::anonymous(realm).with_authid(authid),
        (None, Some(_)) => bail!("--secret requires --authid"),
        (None, None) => ClientCredentials::anonymous(realm),
    };
    let connection = join(settings, credentials, SessionCallbacks::new())
        .await
        .context("Failed to join realm")?;

    let (tx, rx) = oneshot::channel();
    let args = WampArgs::list(args.iter().map(|a| parse_arg(a)).collect());
    let _ = connection
        .session()
        .call(procedure, Dict::new(), args, move |result| {
            let _ = tx.send(result);
        })?;
    let result = rx.await.context("session closed before the result arrived")?;
    connection.shutdown().await;

    if let Some(error) = &result.error {
        bail!("{error}: {}", Value::Array(result.args.args));
    }
    let output = if result.args.kwargs.is_empty() {
        Value::Array(result.args.args)
    } else {
        serde_json::json!({ "args": result.args.args, "kwargs": result.args.kwargs })
    };
    println!("{output}");
    Ok(())
}
