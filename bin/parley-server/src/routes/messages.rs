//! Message history endpoints.
//!
//! `GET /messages` returns the caller's decrypted history; `POST /messages`
//! is the direct append path used outside the streaming flow.  Both derive
//! the owner from the verified session — a caller-supplied user id is not
//! part of either contract.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Extension, Json, Router};
use utoipa::OpenApi;

use crate::db::{MessageStore, Role};
use crate::error::ServerError;
use crate::middleware::auth::Identity;
use crate::schemas::messages::{
    MessageListResponse, MessageView, SaveMessageRequest, SaveMessageResponse,
};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(list_messages, save_message),
    components(schemas(
        MessageListResponse,
        MessageView,
        SaveMessageRequest,
        SaveMessageResponse
    ))
)]
pub struct MessagesApi;

/// Register message-history routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/messages", get(list_messages).post(save_message))
}

/// The caller's conversation history (`GET /messages`).
///
/// Messages are returned in ascending creation order.  A row that cannot be
/// decrypted carries a placeholder content value; it never fails the request.
#[utoipa::path(
    get,
    path = "/messages",
    tag = "messages",
    responses(
        (status = 200, description = "Decrypted history", body = MessageListResponse),
        (status = 401, description = "No valid session"),
        (status = 500, description = "Store failure"),
    )
)]
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<MessageListResponse>, ServerError> {
    let records = state.store.list(&identity.user_id).await?;
    let messages: Vec<MessageView> = records.into_iter().map(Into::into).collect();
    let count = messages.len();
    Ok(Json(MessageListResponse { messages, count }))
}

/// Append one message to the caller's log (`POST /messages`).
#[utoipa::path(
    post,
    path = "/messages",
    tag = "messages",
    request_body = SaveMessageRequest,
    responses(
        (status = 200, description = "Message stored", body = SaveMessageResponse),
        (status = 400, description = "Malformed request body"),
        (status = 401, description = "No valid session"),
        (status = 500, description = "Store failure"),
    )
)]
pub async fn save_message(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<SaveMessageRequest>,
) -> Result<Json<SaveMessageResponse>, ServerError> {
    let Some(role) = Role::parse(&req.role) else {
        return Err(ServerError::BadRequest(format!(
            "unknown role `{}`: expected `user` or `assistant`",
            req.role
        )));
    };
    if req.content.trim().is_empty() {
        return Err(ServerError::BadRequest("content must not be empty".into()));
    }

    let id = state.store.append(&identity.user_id, &req.content, role).await?;
    Ok(Json(SaveMessageResponse { id }))
}

// ── Tests ──────────────────────────────────────────────────────────────────────
