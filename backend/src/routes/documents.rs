use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::documents::Ingested;
use crate::error::{ApiError, Result};
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct FileListResponse {
    pub files: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SelectRequest {
    pub selected_file: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ContentResponse {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    /// Base64 encoded PDF bytes.
    pub file: String,
    pub file_name: String,
    /// Accepted for compatibility; ingestion does not call a model.
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScrapeRequest {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub message: String,
    pub scraped_content: String,
}

impl From<Ingested> for IngestResponse {
    fn from(ingested: Ingested) -> Self {
        Self {
            message: format!("Data scraped and stored at {}", ingested.markdown_key),
            scraped_content: ingested.markdown,
        }
    }
}

/// GET /list_pdfcontent - names of ingested PDFs
async fn list_documents(State(state): State<Arc<AppState>>) -> Result<Json<FileListResponse>> {
    let files = state.documents.list().await?;
    Ok(Json(FileListResponse { files }))
}

/// POST /select_pdfcontent - markdown of one ingested PDF
async fn select_document(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SelectRequest>,
) -> Result<Json<ContentResponse>> {
    let content = state.documents.load(&request.selected_file).await?;
    Ok(Json(ContentResponse { content }))
}

/// POST /upload_pdf - store and convert a base64 encoded PDF
async fn upload_pdf(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UploadRequest>,
) -> Result<Json<IngestResponse>> {
    let data = base64::engine::general_purpose::STANDARD
        .decode(request.file.trim().as_bytes())
        .map_err(|e| ApiError::BadRequest(format!("File is not valid base64: {}", e)))?;

    if let Some(model) = request.model.as_deref().filter(|m| !m.is_empty()) {
        tracing::debug!("Upload of {} tagged with model {}", request.file_name, model);
    }

    let ingested = state.documents.ingest_pdf(&request.file_name, data).await?;
    Ok(Json(ingested.into()))
}

/// POST /scrape-url-docling - fetch, convert and store a web page
async fn scrape_url(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ScrapeRequest>,
) -> Result<Json<IngestResponse>> {
    let ingested = state.documents.ingest_url(request.url.trim()).await?;
    Ok(Json(ingested.into()))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/list_pdfcontent", get(list_documents))
        .route("/select_pdfcontent", post(select_document))
        .route("/upload_pdf", post(upload_pdf))
        .route("/scrape-url-docling", post(scrape_url))
        .with_state(state)
}
