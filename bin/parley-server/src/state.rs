//! Shared application state injected into every Axum handler.
//!
//! Constructed once at startup, read-only thereafter.  Each collaborator is
//! an explicitly constructed client passed in here rather than a global
//! handle, so tests can wire in their own instances.

use std::sync::Arc;

use parley_provider::CompletionClient;

use crate::config::Config;
use crate::db::sqlite::SqliteStore;
use crate::middleware::auth::SessionVerifier;

/// State shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Encrypted per-user message log.
    pub store: Arc<SqliteStore>,
    /// Client for the completion provider.
    pub completions: Arc<CompletionClient>,
    /// Session gate's identity-provider client.
    pub sessions: Arc<SessionVerifier>,
}
