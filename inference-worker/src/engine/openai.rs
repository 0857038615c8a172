//! OpenAI-compatible chat completions client.
//!
//! Gemini exposes the same API under its `/openai` path, so one client
//! serves both providers.

use std::time::Duration;

use async_trait::async_trait;
use docchat_common::{ChatCompletionResponse, ChatMessage};
use reqwest::Client;
use serde::Serialize;

use super::InferenceEngine;
use crate::config::ProviderConfig;
use crate::error::{Error, Result};

pub struct OpenAiCompatibleEngine {
    http_client: Client,
    name: String,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleEngine {
    pub fn new(name: &str, base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Communication(e.to_string()))?;

        Ok(Self {
            http_client,
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_config(name: &str, config: &ProviderConfig) -> Result<Self> {
        Self::new(
            name,
            &config.base_url,
            config.resolve_api_key(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[async_trait]
impl InferenceEngine for OpenAiCompatibleEngine {
    fn engine_type(&self) -> &'static str {
        "openai"
    }

    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<ChatCompletionResponse> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| Error::MissingApiKey(self.name.clone()))?;

        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!("Sending chat request to {}: {} model={}", self.name, url, model);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(api_key)
            .json(&CompletionRequest { model, messages })
            .send()
            .await
            .map_err(|e| Error::Communication(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::InferenceFailed(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| Error::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn engine(server: &MockServer, api_key: Option<&str>) -> OpenAiCompatibleEngine {
        OpenAiCompatibleEngine::new(
            "openai",
            &format!("{}/v1/", server.uri()),
            api_key.map(str::to_string),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_chat_completion_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4o-mini",
                "messages": [{"role": "user", "content": "2+2?"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-1",
                "object": "chat.completion",
                "created": 1700000000,
                "model": "gpt-4o-mini",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "4"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = engine(&server, Some("sk-test"))
            .chat_completion("gpt-4o-mini", &[ChatMessage::user("2+2?")])
            .await
            .unwrap();

        assert_eq!(response.id, "chatcmpl-1");
        assert_eq!(response.content(), Some("4"));
    }

    #[tokio::test]
    async fn test_chat_completion_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .mount(&server)
            .await;

        let err = engine(&server, Some("sk-test"))
            .chat_completion("no-such-model", &[ChatMessage::user("hi")])
            .await
            .unwrap_err();

        match err {
            Error::InferenceFailed(message) => assert!(message.contains("model not found")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_chat_completion_unparseable_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = engine(&server, Some("sk-test"))
            .chat_completion("gpt-4o-mini", &[ChatMessage::user("hi")])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_missing_api_key_skips_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = engine(&server, None)
            .chat_completion("gpt-4o-mini", &[ChatMessage::user("hi")])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MissingApiKey(name) if name == "openai"));
    }
}
