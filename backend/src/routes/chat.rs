use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, Result};
use crate::prompt;
use crate::AppState;

/// Body of `POST /summarize`. `selected_file` carries the document content.
#[derive(Debug, Deserialize)]
pub struct SummarizeRequest {
    pub selected_file: String,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SummarizeResponse {
    pub summary: String,
}

/// Body of `POST /ask_question`. `selected_file` carries the document content.
#[derive(Debug, Deserialize)]
pub struct QuestionRequest {
    pub question: String,
    pub selected_file: String,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuestionResponse {
    pub answer: String,
}

fn require(value: &str, message: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(ApiError::BadRequest(message.to_string()))
    } else {
        Ok(())
    }
}

/// POST /summarize - one-sentence summary of the given content
async fn summarize(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SummarizeRequest>,
) -> Result<Json<SummarizeResponse>> {
    require(&request.selected_file, "No content found in selected files")?;
    require(&request.model, "No model selected")?;

    let start = Instant::now();
    let summary = state
        .broker
        .send(&request.model, prompt::summarize(&request.selected_file))
        .await?;

    tracing::info!(
        model = %request.model,
        latency_ms = start.elapsed().as_millis() as u64,
        "Summary generated"
    );
    Ok(Json(SummarizeResponse { summary }))
}

/// POST /ask_question - answer a question about the given content
async fn ask_question(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QuestionRequest>,
) -> Result<Json<QuestionResponse>> {
    require(&request.selected_file, "No content found in selected files")?;
    require(&request.question, "No question provided")?;
    require(&request.model, "No model selected")?;

    let start = Instant::now();
    let answer = state
        .broker
        .send(
            &request.model,
            prompt::question(&request.selected_file, &request.question),
        )
        .await?;

    tracing::info!(
        model = %request.model,
        latency_ms = start.elapsed().as_millis() as u64,
        "Question answered"
    );
    Ok(Json(QuestionResponse { answer }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/summarize", post(summarize))
        .route("/ask_question", post(ask_question))
        .with_state(state)
}
