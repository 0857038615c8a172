use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init(level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Middleware that logs each HTTP request with its status and latency.
///
/// Server errors are logged at WARN, health probes at DEBUG, the rest at INFO.
pub async fn request_logger(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let duration_ms = start.elapsed().as_millis();

    if response.status().is_server_error() {
        tracing::warn!(%method, %path, status, duration_ms, "HTTP request failed");
    } else if path == "/health" {
        tracing::debug!(%method, %path, status, duration_ms, "HTTP request");
    } else {
        tracing::info!(%method, %path, status, duration_ms, "HTTP request");
    }

    response
}
