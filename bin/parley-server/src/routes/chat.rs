//! The chat endpoint.
//!
//! `POST /chat` drives the full pipeline: validate, durably append the
//! caller's turn, open the provider stream, then hand both off to the relay,
//! which forwards chunks to the caller over SSE while reconstructing the
//! reply for persistence.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderValue, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Extension, Json, Router};
use futures::StreamExt;
use parley_provider::ChatTurn;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;
use utoipa::OpenApi;

use crate::db::{MessageStore, Role};
use crate::error::ServerError;
use crate::middleware::auth::Identity;
use crate::relay;
use crate::schemas::chat::{ChatRequest, TurnInput};
use crate::state::AppState;

/// Maximum allowed content length per turn, in bytes, to prevent memory
/// exhaustion.
const MAX_CONTENT_BYTES: usize = 64 * 1024; // 64 KiB

/// Buffer size of the channel feeding the caller's SSE stream.
const RELAY_BUFFER: usize = 32;

#[derive(OpenApi)]
#[openapi(paths(send_chat), components(schemas(ChatRequest, TurnInput)))]
pub struct ChatApi;

/// Register chat routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/chat", post(send_chat))
}

/// Send a message and stream the reply (`POST /chat`).
///
/// The caller's last turn is durably stored **before** any token is
/// requested, so it survives a failed generation.  The response streams
/// `data: {"choices":[{"delta":{"content":…}}]}` events terminated by
/// `data: [DONE]`; the reconstructed reply is persisted once the stream has
/// drained.
#[utoipa::path(
    post,
    path = "/chat",
    tag = "chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "SSE stream of completion chunks"),
        (status = 400, description = "Malformed request body"),
        (status = 401, description = "No valid session"),
        (status = 500, description = "Completion provider unavailable"),
    )
)]
pub async fn send_chat(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ServerError> {
    let Some(last) = req.messages.last() else {
        return Err(ServerError::BadRequest(
            "messages must be a non-empty array".into(),
        ));
    };
    for turn in &req.messages {
        if Role::parse(&turn.role).is_none() {
            return Err(ServerError::BadRequest(format!(
                "unknown role `{}`: expected `user` or `assistant`",
                turn.role
            )));
        }
        if turn.content.len() > MAX_CONTENT_BYTES {
            return Err(ServerError::BadRequest(format!(
                "message too large ({} bytes); maximum is {} bytes",
                turn.content.len(),
                MAX_CONTENT_BYTES,
            )));
        }
    }
    if last.content.trim().is_empty() {
        return Err(ServerError::BadRequest("message content must not be empty".into()));
    }

    debug!(user = %identity.user_id, turns = req.messages.len(), "chat request");

    // The user's turn is persisted strictly before generation begins; a
    // provider failure past this point cannot lose it.
    state
        .store
        .append(&identity.user_id, &last.content, Role::User)
        .await?;

    let history: Vec<ChatTurn> = req
        .messages
        .iter()
        .map(|m| ChatTurn::new(m.role.clone(), m.content.clone()))
        .collect();
    let upstream = state.completions.stream_chat(history).await?;

    let (tx, rx) = mpsc::channel::<String>(RELAY_BUFFER);
    let store = Arc::clone(&state.store);
    let owner = identity.user_id.clone();
    tokio::spawn(async move {
        relay::run(store.as_ref(), &owner, upstream, tx).await;
    });

    let stream =
        ReceiverStream::new(rx).map(|payload| Ok::<_, Infallible>(Event::default().data(payload)));
    let mut response = Sse::new(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    Ok(response)
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Config;
    use crate::db::sqlite::SqliteStore;
    use crate::middleware::auth::SessionVerifier;
    use crate::routes;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use http_body_util::BodyExt;
    use parley_cipher::MessageCipher;
    use parley_provider::{CompletionClient, ProviderConfig};
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(provider_url: &str, identity_url: &str, database_url: &str) -> Config {
        Config {
            bind_address: "127.0.0.1:0".into(),
            database_url: database_url.into(),
            encryption_key: BASE64.encode([7u8; 32]),
            provider_url: provider_url.into(),
            provider_api_key: "test-key".into(),
            model: "test-model".into(),
            max_tokens: 256,
            temperature: 0.7,
            identity_url: identity_url.into(),
            log_level: "info".into(),
            log_json: false,
            cors_allowed_origins: None,
            enable_swagger: false,
        }
    }

    async fn test_state(provider_url: &str, identity_url: &str) -> (Arc<AppState>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let database_url = format!("sqlite://{}/messages.db?mode=rwc", dir.path().display());
        let config = test_config(provider_url, identity_url, &database_url);
        let cipher = MessageCipher::from_base64(&config.encryption_key).unwrap();
        let store = SqliteStore::connect(&config.database_url, cipher).await.unwrap();
        let completions = CompletionClient::new(ProviderConfig {
            base_url: config.provider_url.clone(),
            api_key: config.provider_api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        });
        let sessions = SessionVerifier::new(config.identity_url.clone());
        let state = Arc::new(AppState {
            config: Arc::new(config),
            store: Arc::new(store),
            completions: Arc::new(completions),
            sessions: Arc::new(sessions),
        });
        (state, dir)
    }

    async fn mock_identity(user_id: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": user_id })),
            )
            .mount(&server)
            .await;
        server
    }

    fn chunk(text: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": text}}]})
        )
    }

    fn chat_request(body: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("cookie", format!("session_token={token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    /// The assistant append happens after the SSE body completes, so poll
    /// briefly instead of assuming synchronous persistence.
    async fn wait_for_rows(state: &AppState, owner: &str, expected: usize) -> Vec<crate::db::MessageRecord> {
        for _ in 0..100 {
            let rows = state.store.list(owner).await.unwrap();
            if rows.len() >= expected {
                return rows;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("store never reached {expected} rows for {owner}");
    }

    #[tokio::test]
    async fn chat_streams_chunks_and_persists_both_turns() {
        let identity = mock_identity("user-1").await;
        let provider = MockServer::start().await;
        let body = format!("{}{}{}data: [DONE]\n\n", chunk("Hi"), chunk(" there"), chunk("!"));
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&provider)
            .await;

        let (state, _db) = test_state(&provider.uri(), &identity.uri()).await;
        let app = routes::build(state.clone());

        let response = app
            .oneshot(chat_request(
                r#"{"messages":[{"role":"user","content":"Hello"}]}"#,
                Some("tok-1"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_owned();
        assert!(content_type.starts_with("text/event-stream"), "got {content_type}");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let events: Vec<&str> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .collect();
        assert_eq!(events.len(), 4);
        assert_eq!(events[3], "[DONE]");

        let rows = wait_for_rows(&state, "user-1", 2).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].role, Role::User);
        assert_eq!(rows[0].content, "Hello");
        assert_eq!(rows[1].role, Role::Assistant);
        assert_eq!(rows[1].content, "Hi there!");
        assert!(rows[0].created_at < rows[1].created_at);
    }

    #[tokio::test]
    async fn empty_messages_is_rejected_before_any_write() {
        let identity = mock_identity("user-1").await;
        let (state, _db) = test_state("http://127.0.0.1:1", &identity.uri()).await;
        let app = routes::build(state.clone());

        for body in [r#"{"messages":[]}"#, r#"{}"#] {
            let response = app
                .clone()
                .oneshot(chat_request(body, Some("tok-1")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
        assert!(state.store.list("user-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_role_is_rejected() {
        let identity = mock_identity("user-1").await;
        let (state, _db) = test_state("http://127.0.0.1:1", &identity.uri()).await;
        let app = routes::build(state.clone());

        let response = app
            .oneshot(chat_request(
                r#"{"messages":[{"role":"wizard","content":"Hello"}]}"#,
                Some("tok-1"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.store.list("user-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_session_is_rejected_without_store_access() {
        let identity = mock_identity("user-1").await;
        let (state, _db) = test_state("http://127.0.0.1:1", &identity.uri()).await;
        let app = routes::build(state.clone());

        let response = app
            .oneshot(chat_request(
                r#"{"messages":[{"role":"user","content":"Hello"}]}"#,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(state.store.list("user-1").await.unwrap().is_empty());
        // The identity provider was never consulted.
        assert!(identity.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn provider_initiation_failure_is_a_500_with_the_user_turn_kept() {
        let identity = mock_identity("user-1").await;
        let provider = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&provider)
            .await;

        let (state, _db) = test_state(&provider.uri(), &identity.uri()).await;
        let app = routes::build(state.clone());

        let response = app
            .oneshot(chat_request(
                r#"{"messages":[{"role":"user","content":"Hello"}]}"#,
                Some("tok-1"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        // Generic message only; provider detail stays in the logs.
        assert_eq!(body["error"], "failed to generate a response");

        // The user's turn was appended before generation was attempted.
        let rows = state.store.list("user-1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].role, Role::User);
    }
}
