use std::sync::Arc;

use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::require_bearer_token;
use crate::handlers;
use crate::state::AppState;

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/pool", get(handlers::get_pool))
        .route("/queue", get(handlers::get_queue))
        .route("/evaluations/:id", get(handlers::get_evaluation))
        .route("/events", get(handlers::get_events))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer_token))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn auth_token(token: impl Into<String>) -> Arc<String> {
    Arc::new(token.into())
}
