//! parley-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing (JSON in production, pretty in dev).
//! 3. Decode the message-encryption key (fail fast on a bad key).
//! 4. Open the SQLite database and run pending migrations.
//! 5. Construct the completion-provider client and the session verifier.
//! 6. Build the Axum router and start the HTTP server with graceful shutdown.

mod config;
mod db;
mod error;
mod middleware;
mod relay;
mod routes;
mod schemas;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use parley_cipher::MessageCipher;
use parley_provider::{CompletionClient, ProviderConfig};
use tracing::{info, warn};

use crate::config::Config;
use crate::db::sqlite::SqliteStore;
use crate::middleware::auth::SessionVerifier;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env()?;

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    // Build the log-level filter, warning loudly if the configured value is
    // not a valid tracing filter expression.
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: PARLEY_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "parley-server starting");

    // ── 3. Message cipher ──────────────────────────────────────────────────────
    // The key is decoded exactly once; every store read/write shares it
    // read-only from here on.
    let cipher = MessageCipher::from_base64(&cfg.encryption_key)
        .map_err(|e| anyhow::anyhow!("PARLEY_ENCRYPTION_KEY is invalid: {e}"))?;

    // ── 4. Database ────────────────────────────────────────────────────────────
    let store = SqliteStore::connect(&cfg.database_url, cipher).await?;
    info!(database_url = %cfg.database_url, "database ready");

    // ── 5. External collaborators ──────────────────────────────────────────────
    let completions = CompletionClient::new(ProviderConfig {
        base_url: cfg.provider_url.clone(),
        api_key: cfg.provider_api_key.clone(),
        model: cfg.model.clone(),
        max_tokens: cfg.max_tokens,
        temperature: cfg.temperature,
    });
    let sessions = SessionVerifier::new(cfg.identity_url.clone());

    // ── 6. Shared application state ────────────────────────────────────────────
    let state = Arc::new(AppState {
        config: Arc::new(cfg.clone()),
        store: Arc::new(store),
        completions: Arc::new(completions),
        sessions: Arc::new(sessions),
    });

    // ── 7. HTTP server with graceful shutdown ──────────────────────────────────
    let app = routes::build(Arc::clone(&state));
    let addr: SocketAddr = cfg.bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("parley-server stopped");
    Ok(())
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c   => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
