//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors are automatically converted
//! to a JSON-body HTTP response with an appropriate status code.
//!
//! **Security note:** Internal errors (provider, store) are logged with full
//! detail but only a generic message is returned to the caller so that
//! provider responses, SQL, or other implementation details never leak to
//! clients.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::db::StoreError;

/// All errors that can occur in the request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// No valid session is attached to the request.
    #[error("unauthorised")]
    Unauthorized,

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The completion provider rejected the request before streaming began.
    #[error("completion provider error: {0}")]
    Provider(#[from] parley_provider::ProviderError),

    /// Propagated from the message store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            // Client-facing errors: expose the message directly.
            ServerError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorised".to_owned()),
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),

            // Internal errors: log the full detail, return a generic message.
            ServerError::Provider(e) => {
                error!(error = %e, "completion provider error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "failed to generate a response".to_owned(),
                )
            }
            ServerError::Store(e) => {
                error!(error = %e, "message store error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}
