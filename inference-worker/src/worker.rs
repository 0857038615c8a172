//! Request stream consumption loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use docchat_common::protocol::correlation_id;
use docchat_common::{
    BlockMode, RequestMessage, ResponseMessage, StreamConfig, StreamEntry, StreamTransport,
};
use futures_util::FutureExt;
use tokio::sync::watch;

use crate::config::WorkerSettings;
use crate::engine::InferenceEngine;
use crate::error::{Error, Result};

/// One consumer of the request group.
///
/// Entries are acknowledged as soon as they are read, so a crash mid-inference
/// loses that request and the waiting caller times out. Every entry that
/// carries an `id` gets exactly one response.
pub struct Worker {
    transport: Arc<dyn StreamTransport>,
    engine: Arc<dyn InferenceEngine>,
    streams: StreamConfig,
    settings: WorkerSettings,
    consumer: String,
}

impl Worker {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        engine: Arc<dyn InferenceEngine>,
        streams: StreamConfig,
        settings: WorkerSettings,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            engine,
            streams,
            settings,
            consumer: consumer.into(),
        }
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Run until `shutdown` flips to true or its sender is dropped.
    ///
    /// Shutdown is checked between reads, never during one: a group read that
    /// was abandoned midway could leave an entry assigned to this consumer
    /// with nobody to answer it. The loop therefore exits within `block_ms`
    /// (or after the next request when `block_ms` is 0), and a request already
    /// read is answered first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Worker {} listening on {} (group {})",
            self.consumer,
            self.streams.request_stream,
            self.streams.request_group
        );

        let block = BlockMode::from_millis(self.settings.block_ms);

        loop {
            if stopping(&shutdown) {
                break;
            }

            let read = self
                .transport
                .consume_group(
                    &self.streams.request_stream,
                    &self.streams.request_group,
                    &self.consumer,
                    1,
                    block,
                )
                .await;

            let pause = match read {
                Ok(entries) if entries.is_empty() => self.settings.idle_delay(),
                Ok(entries) => {
                    for entry in entries {
                        if let Err(e) = self.handle_entry(entry).await {
                            tracing::error!("Worker {} failed to answer request: {}", self.consumer, e);
                        }
                    }
                    continue;
                }
                Err(e) => {
                    tracing::error!("Worker {} failed to read requests: {}", self.consumer, e);
                    self.settings.retry_delay()
                }
            };

            if stopping(&shutdown) {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(pause) => {}
            }
        }

        tracing::info!("Worker {} stopped", self.consumer);
    }

    /// Acknowledge, process and answer a single request entry.
    ///
    /// Only a failure to publish the response is returned as an error; every
    /// other failure is turned into an error response.
    pub async fn handle_entry(&self, entry: StreamEntry) -> Result<()> {
        if let Err(e) = self
            .transport
            .acknowledge(&self.streams.request_stream, &self.streams.request_group, &entry.id)
            .await
        {
            tracing::warn!("Failed to acknowledge request entry {}: {}", entry.id, e);
        }

        let Some(id) = correlation_id(&entry.fields).map(str::to_string) else {
            tracing::error!(
                "Request entry {} has no id, no response can be correlated",
                entry.id
            );
            return Ok(());
        };

        let response = match RequestMessage::from_fields(&entry.fields) {
            Ok(request) => self.answer(request).await,
            Err(e) => {
                tracing::error!("Request {} could not be decoded: {}", id, e);
                ResponseMessage::error(&id, format!("Invalid request: {}", e))
            }
        };

        self.transport
            .publish(&self.streams.response_stream, &response.to_fields())
            .await
            .map_err(Error::from)?;

        tracing::debug!("Published response for request {}", id);
        Ok(())
    }

    async fn answer(&self, request: RequestMessage) -> ResponseMessage {
        tracing::info!(
            "Processing request {} (model={}, messages={})",
            request.id,
            request.model,
            request.prompt.len()
        );

        let completion = AssertUnwindSafe(
            self.engine
                .chat_completion(&request.model, &request.prompt),
        )
        .catch_unwind()
        .await;

        match completion {
            Ok(Ok(completion)) => match ResponseMessage::completion(&request.id, &completion) {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!("Request {} result could not be encoded: {}", request.id, e);
                    ResponseMessage::error(&request.id, e.to_string())
                }
            },
            Ok(Err(e)) => {
                tracing::error!("Inference failed for request {}: {}", request.id, e);
                ResponseMessage::error(&request.id, e.to_string())
            }
            Err(_) => {
                tracing::error!("Inference engine panicked on request {}", request.id);
                ResponseMessage::error(&request.id, "Inference engine panicked")
            }
        }
    }
}

/// True once shutdown was requested or its sender is gone.
fn stopping(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}
