//! Axum router construction.
//!
//! [`build`] assembles the complete application router, including:
//! - Middleware layers (CORS, per-request trace-ID injection)
//! - The session gate in front of every chat/history route
//! - Optional Swagger UI / OpenAPI spec endpoint (disable with
//!   `PARLEY_ENABLE_SWAGGER=false`)
//! - Health / heartbeat route

mod chat;
pub mod doc;
mod health;
mod messages;

use std::sync::Arc;

use axum::{Router, middleware};
use tower::ServiceBuilder;
use utoipa_swagger_ui::SwaggerUi;

use crate::middleware::{auth, cors, trace};
use crate::state::AppState;

// ── Router builder ────────────────────────────────────────────────────────────

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    // Every route except the heartbeat requires a verified session.
    let protected = Router::new()
        .merge(chat::router())
        .merge(messages::router())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_session,
        ));

    let mut app = Router::new().merge(health::router()).merge(protected);

    // ── Swagger UI ────────────────────────────────────────────────────────────
    // Enabled by default; disable with PARLEY_ENABLE_SWAGGER=false in
    // production to avoid exposing the API structure to potential attackers.
    if state.config.enable_swagger {
        app = app.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", doc::get_docs()));
    }

    app
        // Outermost layers execute first on the way in.
        .layer(ServiceBuilder::new().layer(cors::cors_layer(state.clone())))
        .layer(middleware::from_fn(trace::trace_middleware))
        .with_state(state)
}
