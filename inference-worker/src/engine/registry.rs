//! Provider routing for multiple inference engines.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use docchat_common::{ChatCompletionResponse, ChatMessage};
use tokio::sync::RwLock;

use super::InferenceEngine;
use crate::error::{Error, Result};

/// Registry of configured providers, itself usable as an engine.
///
/// A model named `<provider>/<model>` goes to that provider with the prefix
/// stripped. Any other name goes to the default provider unchanged.
pub struct ProviderRouter {
    providers: RwLock<HashMap<String, Arc<dyn InferenceEngine>>>,
    default_provider: String,
}

impl ProviderRouter {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            default_provider: default_provider.into(),
        }
    }

    /// Register an engine under a provider name.
    pub async fn register(&self, name: impl Into<String>, engine: Arc<dyn InferenceEngine>) {
        let mut providers = self.providers.write().await;
        providers.insert(name.into(), engine);
    }

    /// Names of all registered providers, sorted.
    pub async fn names(&self) -> Vec<String> {
        let providers = self.providers.read().await;
        let mut names: Vec<String> = providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Pick the engine and provider-local model name for a request.
    pub async fn resolve(&self, model: &str) -> Result<(Arc<dyn InferenceEngine>, String)> {
        let providers = self.providers.read().await;

        if let Some((prefix, rest)) = model.split_once('/') {
            if let Some(engine) = providers.get(prefix) {
                return Ok((engine.clone(), rest.to_string()));
            }
        }

        providers
            .get(&self.default_provider)
            .map(|engine| (engine.clone(), model.to_string()))
            .ok_or_else(|| Error::UnknownProvider(self.default_provider.clone()))
    }
}

#[async_trait]
impl InferenceEngine for ProviderRouter {
    fn engine_type(&self) -> &'static str {
        "router"
    }

    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<ChatCompletionResponse> {
        // Release the lock before the provider call
        let (engine, local_model) = self.resolve(model).await?;
        engine.chat_completion(&local_model, messages).await
    }
}
