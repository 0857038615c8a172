use axum::{routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
struct BannerResponse {
    message: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn root() -> Json<BannerResponse> {
    Json(BannerResponse {
        message: "Document Chat API: gateway with stream-brokered LLM workers is running",
    })
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router() -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
}
