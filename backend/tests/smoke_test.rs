use std::sync::Arc;

use async_trait::async_trait;
use docchat_backend::routes;
use docchat_backend::test_util::{create_test_gateway, test_config, TestGateway};
use docchat_backend::BlobStore;
use docchat_common::{ChatCompletionResponse, ChatMessage, StreamConfig};
use http::StatusCode;
use inference_worker::config::WorkerSettings;
use inference_worker::{InferenceEngine, WorkerPool};
use serde_json::{json, Value};
use tokio::sync::watch;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Answers "4" for any prompt, rejects the model "invalid-model".
struct ArithmeticEngine;

#[async_trait]
impl InferenceEngine for ArithmeticEngine {
    fn engine_type(&self) -> &'static str {
        "arithmetic"
    }

    async fn chat_completion(
        &self,
        model: &str,
        _messages: &[ChatMessage],
    ) -> inference_worker::Result<ChatCompletionResponse> {
        if model == "invalid-model" {
            return Err(inference_worker::Error::InferenceFailed(format!(
                "HTTP 404: model '{}' does not exist",
                model
            )));
        }
        Ok(ChatCompletionResponse::new(model, "4"))
    }
}

/// Start a worker pool on the gateway's stream. Dropping the sender stops it.
fn spawn_worker(gateway: &TestGateway) -> watch::Sender<bool> {
    let settings = WorkerSettings {
        block_ms: 100,
        idle_delay_ms: 10,
        ..WorkerSettings::default()
    };
    let pool = WorkerPool::new(
        gateway.stream.clone(),
        Arc::new(ArithmeticEngine),
        StreamConfig::default(),
        settings,
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move { pool.run(shutdown_rx).await });
    shutdown_tx
}

async fn send_request(
    app: &axum::Router,
    method: http::Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut req_builder = http::Request::builder().method(method).uri(uri);

    if body.is_some() {
        req_builder = req_builder.header("Content-Type", "application/json");
    }

    let req = req_builder
        .body(match body {
            Some(b) => axum::body::Body::from(b.to_string()),
            None => axum::body::Body::empty(),
        })
        .unwrap();

    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn gateway() -> (TestGateway, axum::Router) {
    let gateway = create_test_gateway(test_config()).await.unwrap();
    let app = routes::app(gateway.state.clone());
    (gateway, app)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_gateway, app) = gateway().await;

    let (status, body) = send_request(&app, http::Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_root_banner() {
    let (_gateway, app) = gateway().await;

    let (status, body) = send_request(&app, http::Method::GET, "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].as_str().unwrap().contains("Document Chat API"));
}

#[tokio::test]
async fn test_nonexistent_route_returns_404() {
    let (_gateway, app) = gateway().await;

    let (status, _) = send_request(&app, http::Method::GET, "/nonexistent", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_summarize_returns_worker_answer() {
    let (gateway, app) = gateway().await;
    let _worker = spawn_worker(&gateway);

    let (status, body) = send_request(
        &app,
        http::Method::POST,
        "/summarize",
        Some(json!({"selected_file": "What is 2+2? It is four.", "model": "test"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"], "4");
}

#[tokio::test]
async fn test_ask_question_with_rejected_model() {
    let (gateway, app) = gateway().await;
    let _worker = spawn_worker(&gateway);

    let (status, body) = send_request(
        &app,
        http::Method::POST,
        "/ask_question",
        Some(json!({
            "question": "2+2?",
            "selected_file": "Arithmetic notes",
            "model": "invalid-model"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["type"], "inference_failed");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("invalid-model"));
}

#[tokio::test]
async fn test_summarize_requires_content() {
    let (_gateway, app) = gateway().await;

    let (status, body) = send_request(
        &app,
        http::Method::POST,
        "/summarize",
        Some(json!({"selected_file": "  ", "model": "test"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "invalid_request");
}

#[tokio::test(start_paused = true)]
async fn test_summarize_times_out_without_workers() {
    let (_gateway, app) = gateway().await;

    let (status, body) = send_request(
        &app,
        http::Method::POST,
        "/summarize",
        Some(json!({"selected_file": "content", "model": "test"})),
    )
    .await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"]["type"], "timeout");
    assert_eq!(
        body["error"]["message"],
        "Error: Timeout reached while waiting for response"
    );
}

#[tokio::test]
async fn test_list_and_select_documents() {
    let (gateway, app) = gateway().await;
    gateway
        .store
        .put("pdf/docling/reportpdf/extracted_data.md", b"# Report")
        .await
        .unwrap();
    gateway
        .store
        .put("pdf/docling/reportpdf/images/report_image_1.png", b"png")
        .await
        .unwrap();

    let (status, body) = send_request(&app, http::Method::GET, "/list_pdfcontent", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"files": ["reportpdf"]}));

    let (status, body) = send_request(
        &app,
        http::Method::POST,
        "/select_pdfcontent",
        Some(json!({"selected_file": "reportpdf"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], "# Report");

    let (status, body) = send_request(
        &app,
        http::Method::POST,
        "/select_pdfcontent",
        Some(json!({"selected_file": "missing"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["type"], "not_found");
}

#[tokio::test]
async fn test_upload_pdf_rejects_bad_base64() {
    let (_gateway, app) = gateway().await;

    let (status, body) = send_request(
        &app,
        http::Method::POST,
        "/upload_pdf",
        Some(json!({"file": "%%%not-base64%%%", "file_name": "a.pdf", "model": ""})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "invalid_request");
}

#[tokio::test]
async fn test_upload_pdf_converts_and_lists() {
    let converter = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/convert"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "markdown": "# Uploaded\n<!-- image -->",
            "images": [{"name": "notes_image_1.png", "data": "cG5n"}]
        })))
        .expect(1)
        .mount(&converter)
        .await;

    let mut config = test_config();
    config.converter.base_url = converter.uri();
    let gateway = create_test_gateway(config).await.unwrap();
    let app = routes::app(gateway.state.clone());

    // "%PDF-1.7" in base64
    let (status, body) = send_request(
        &app,
        http::Method::POST,
        "/upload_pdf",
        Some(json!({"file": "JVBERi0xLjc=", "file_name": "notes.pdf", "model": "test"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["scraped_content"],
        "# Uploaded\n![Image](pdf/docling/notespdf/images/notes_image_1.png)"
    );
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("pdf/docling/notespdf/extracted_data.md"));
    assert_eq!(
        gateway.store.get("pdf/docling/notespdf/notes.pdf").await.unwrap(),
        b"%PDF-1.7"
    );

    let (_, body) = send_request(&app, http::Method::GET, "/list_pdfcontent", None).await;
    assert_eq!(body, json!({"files": ["notespdf"]}));
}

#[tokio::test]
async fn test_upload_pdf_converter_failure() {
    let converter = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&converter)
        .await;

    let mut config = test_config();
    config.converter.base_url = converter.uri();
    let gateway = create_test_gateway(config).await.unwrap();
    let app = routes::app(gateway.state.clone());

    let (status, body) = send_request(
        &app,
        http::Method::POST,
        "/upload_pdf",
        Some(json!({"file": "JVBERi0xLjc=", "file_name": "notes.pdf"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["type"], "conversion_failed");
}

#[tokio::test]
async fn test_scrape_rejects_invalid_url() {
    let (_gateway, app) = gateway().await;

    let (status, _) = send_request(
        &app,
        http::Method::POST,
        "/scrape-url-docling",
        Some(json!({"url": "not a url"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}
