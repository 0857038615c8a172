//! Inference engine abstraction layer.
//!
//! This module defines the `InferenceEngine` trait that abstracts the hosted
//! LLM providers behind a single chat completion call.

mod openai;
mod registry;

pub use openai::OpenAiCompatibleEngine;
pub use registry::ProviderRouter;

use async_trait::async_trait;
use docchat_common::{ChatCompletionResponse, ChatMessage};

use crate::error::Result;

/// Primary trait for inference engines.
///
/// The worker hands every decoded request to one engine and publishes
/// whatever it returns, success or error.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Unique identifier for this engine (e.g., "openai", "router").
    fn engine_type(&self) -> &'static str;

    /// Run a chat completion for the given model and conversation.
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<ChatCompletionResponse>;
}
