pub mod chat;
pub mod documents;
pub mod health;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{middleware, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::logging::request_logger;
use crate::AppState;

/// Build the full HTTP application.
pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(health::router())
        .merge(chat::router(state.clone()))
        .merge(documents::router(state.clone()))
        .layer(DefaultBodyLimit::max(state.config.server.max_body_bytes))
        .layer(middleware::from_fn(request_logger))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
