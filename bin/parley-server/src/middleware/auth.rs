//! Session gate.
//!
//! Every protected route resolves the caller's identity against the identity
//! provider before any handler runs.  Verification is per-request; nothing is
//! cached, so a revoked session is rejected on its next request.
//!
//! The session token travels either in the `session_token` cookie (browser
//! callers) or in an `Authorization: Bearer` header.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::error::ServerError;
use crate::state::AppState;

/// Cookie holding the session token for browser callers.
pub const SESSION_COOKIE: &str = "session_token";

/// The authenticated caller, injected as a request extension by
/// [`require_session`].  Handlers derive ownership from this value and never
/// from request bodies.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
}

/// Client for the identity provider.
#[derive(Debug, Clone)]
pub struct SessionVerifier {
    client: reqwest::Client,
    base_url: String,
}

impl SessionVerifier {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into() }
    }

    /// Resolve `token` to a stable user identity.
    ///
    /// Any failure — unreachable provider, rejected token, unexpected body —
    /// reads as "no valid session"; the caller must re-authenticate.
    pub async fn verify(&self, token: &str) -> Result<Identity, ServerError> {
        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "identity provider unreachable");
                ServerError::Unauthorized
            })?;

        if !response.status().is_success() {
            return Err(ServerError::Unauthorized);
        }

        let user: UserResponse = response.json().await.map_err(|e| {
            tracing::warn!(error = %e, "identity provider returned an unexpected body");
            ServerError::Unauthorized
        })?;
        Ok(Identity { user_id: user.id })
    }
}

/// Reject the request with 401 unless a valid session token is attached.
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = session_token(&req) else {
        return ServerError::Unauthorized.into_response();
    };

    match state.sessions.verify(&token).await {
        Ok(identity) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

/// Token from the `session_token` cookie, falling back to a bearer header.
fn session_token(req: &Request<Body>) -> Option<String> {
    let from_cookie = req
        .headers()
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|cookies| {
            cookies.split(';').find_map(|cookie| {
                let (name, value) = cookie.trim().split_once('=')?;
                (name == SESSION_COOKIE).then(|| value.to_string())
            })
        });

    from_cookie.or_else(|| {
        req.headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string)
    })
}

// ── Tests ──────────────────────────────────────────────────────────────────────
