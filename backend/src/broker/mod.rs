//! Correlation broker.
//!
//! Turns the asynchronous request/response streams into a blocking
//! `send(model, prompt) -> text` call for HTTP handlers.
//!
//! # Flow
//!
//! 1. `send` registers a waiter slot under a fresh UUID, then publishes the
//!    request
//! 2. The dispatcher task reads the response group and hands each response to
//!    the slot with the same `id`
//! 3. `send` waits on its slot until the deadline (30 s by default, counted
//!    from the start of the call)
//!
//! Each broker reads the response stream through its own group, named
//! `<response_group>-<uuid>` and created at the tail of the stream. Every
//! gateway therefore sees every response; a group shared between gateways
//! would hand each response to only one of them.
//!
//! Responses for other processes stay pending. Responses that arrive after
//! their call timed out are acknowledged and dropped. The janitor task
//! acknowledges anything left pending for this consumer past the orphan TTL.

mod dispatcher;

use std::sync::Arc;
use std::time::Duration;

use docchat_common::{
    ChatMessage, GroupStart, ProtocolError, ReplyError, RequestMessage, StreamConfig, StreamError,
    StreamTransport,
};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use self::dispatcher::{Dispatcher, PendingCalls, WaiterGuard};
use crate::config::BrokerConfig;

/// Message returned when no response arrived in time.
pub const TIMEOUT_MESSAGE: &str = "Error: Timeout reached while waiting for response";

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("{}", TIMEOUT_MESSAGE)]
    Timeout,

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Stream transport error: {0}")]
    Transport(#[from] StreamError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Response dispatcher stopped")]
    DispatcherStopped,
}

impl From<ReplyError> for BrokerError {
    fn from(err: ReplyError) -> Self {
        match err {
            ReplyError::Failed(message) => BrokerError::Inference(message),
            ReplyError::Malformed(message) => BrokerError::MalformedResponse(message),
        }
    }
}

pub struct CorrelationBroker {
    transport: Arc<dyn StreamTransport>,
    streams: StreamConfig,
    timeout: Duration,
    calls: Arc<PendingCalls>,
    tasks: Vec<JoinHandle<()>>,
}

/// Response group owned by a single broker instance.
fn private_group(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

impl CorrelationBroker {
    /// Create the consumer groups and start the dispatcher and janitor tasks.
    ///
    /// `streams.response_group` is used as a prefix for this broker's own group.
    pub async fn start(
        transport: Arc<dyn StreamTransport>,
        streams: StreamConfig,
        config: &BrokerConfig,
    ) -> Result<Self, BrokerError> {
        let streams = StreamConfig {
            response_group: private_group(&streams.response_group),
            ..streams
        };

        transport
            .ensure_group(&streams.request_stream, &streams.request_group)
            .await?;
        transport
            .create_group(
                &streams.response_stream,
                &streams.response_group,
                GroupStart::Latest,
            )
            .await?;

        let calls = Arc::new(PendingCalls::default());
        let dispatcher = Arc::new(Dispatcher {
            transport: transport.clone(),
            streams: streams.clone(),
            calls: calls.clone(),
            block: config.poll_block(),
            retry_delay: config.retry_delay(),
        });

        let reader = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.run().await }
        });
        let janitor = tokio::spawn({
            let interval = config.janitor_interval();
            let orphan_ttl = config.orphan_ttl();
            async move { dispatcher.run_janitor(interval, orphan_ttl).await }
        });

        tracing::info!(
            "Correlation broker started on {} -> {} (group {}) via {} (timeout {}s)",
            streams.request_stream,
            streams.response_stream,
            streams.response_group,
            transport.kind(),
            config.timeout_secs
        );

        Ok(Self {
            transport,
            streams,
            timeout: config.timeout(),
            calls,
            tasks: vec![reader, janitor],
        })
    }

    /// Publish a prompt and wait for the matching completion text.
    pub async fn send(&self, model: &str, prompt: Vec<ChatMessage>) -> Result<String, BrokerError> {
        let deadline = Instant::now() + self.timeout;

        let request = RequestMessage::new(model, prompt);
        let fields = request.to_fields()?;

        // Register before publishing so a fast response cannot be missed
        let receiver = self.calls.register(&request.id);
        let mut guard = WaiterGuard::new(&self.calls, request.id.as_str());

        self.transport
            .publish(&self.streams.request_stream, &fields)
            .await?;
        tracing::debug!("Published request {} (model={})", request.id, model);

        let response = match tokio::time::timeout_at(deadline, receiver).await {
            Ok(Ok(response)) => {
                guard.disarm();
                response
            }
            Ok(Err(_)) => return Err(BrokerError::DispatcherStopped),
            Err(_) => {
                tracing::warn!(
                    "Request {} timed out after {}s",
                    request.id,
                    self.timeout.as_secs()
                );
                return Err(BrokerError::Timeout);
            }
        };

        tracing::debug!("Received response for request {}", request.id);
        Ok(response.content()?)
    }

    /// Calls currently waiting for a response.
    pub fn in_flight(&self) -> usize {
        self.calls.in_flight()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn transport_kind(&self) -> &'static str {
        self.transport.kind()
    }

    /// Name of the response group this broker reads from.
    pub fn response_group(&self) -> &str {
        &self.streams.response_group
    }

    /// Stop the background tasks and delete this broker's response group.
    pub async fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }

        if let Err(e) = self
            .transport
            .remove_group(&self.streams.response_stream, &self.streams.response_group)
            .await
        {
            tracing::warn!(
                "Failed to remove response group {}: {}",
                self.streams.response_group,
                e
            );
        }
    }
}

impl Drop for CorrelationBroker {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docchat_common::{
        BlockMode, ChatCompletionResponse, MemoryStream, RequestMessage, ResponseMessage,
    };

    fn broker_config() -> BrokerConfig {
        BrokerConfig {
            poll_block_ms: 100,
            ..BrokerConfig::default()
        }
    }

    async fn start(stream: &Arc<MemoryStream>) -> CorrelationBroker {
        CorrelationBroker::start(stream.clone(), StreamConfig::default(), &broker_config())
            .await
            .unwrap()
    }

    /// Answer the next request on the stream with `reply(request)`.
    async fn answer_next<F>(stream: &MemoryStream, reply: F) -> RequestMessage
    where
        F: FnOnce(&RequestMessage) -> ResponseMessage,
    {
        let entries = stream
            .consume_group("request_stream", "request_group", "Worker", 1, BlockMode::Forever)
            .await
            .unwrap();
        let request = RequestMessage::from_fields(&entries[0].fields).unwrap();
        stream
            .publish("response_stream", &reply(&request).to_fields())
            .await
            .unwrap();
        request
    }

    #[tokio::test]
    async fn test_send_returns_content() {
        let stream = Arc::new(MemoryStream::new());
        let broker = start(&stream).await;

        let worker = tokio::spawn({
            let stream = stream.clone();
            async move {
                answer_next(&stream, |request| {
                    ResponseMessage::completion(&request.id, &ChatCompletionResponse::new("test", "4"))
                        .unwrap()
                })
                .await
            }
        });

        let answer = broker
            .send("test", vec![ChatMessage::user("2+2?")])
            .await
            .unwrap();
        assert_eq!(answer, "4");

        let request = worker.await.unwrap();
        assert_eq!(request.model, "test");
        assert_eq!(request.prompt, vec![ChatMessage::user("2+2?")]);
        assert_eq!(broker.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_error_response_is_inference_error() {
        let stream = Arc::new(MemoryStream::new());
        let broker = start(&stream).await;

        tokio::spawn({
            let stream = stream.clone();
            async move {
                answer_next(&stream, |request| {
                    ResponseMessage::error(&request.id, "model 'invalid-model' not supported")
                })
                .await
            }
        });

        let err = broker
            .send("invalid-model", vec![ChatMessage::user("hi")])
            .await
            .unwrap_err();
        match err {
            BrokerError::Inference(message) => assert!(message.contains("invalid-model")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let stream = Arc::new(MemoryStream::new());
        let broker = start(&stream).await;

        tokio::spawn({
            let stream = stream.clone();
            async move {
                answer_next(&stream, |request| ResponseMessage {
                    id: request.id.clone(),
                    response: r#"{"choices": []}"#.to_string(),
                })
                .await
            }
        });

        let err = broker
            .send("test", vec![ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::MalformedResponse(_)));
        assert_ne!(err.to_string(), TIMEOUT_MESSAGE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_without_worker() {
        let stream = Arc::new(MemoryStream::new());
        let broker = start(&stream).await;

        let started = Instant::now();
        let err = broker
            .send("test", vec![ChatMessage::user("anyone?")])
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, BrokerError::Timeout));
        assert_eq!(err.to_string(), TIMEOUT_MESSAGE);
        assert!(elapsed >= Duration::from_secs(30), "gave up early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(31), "waited too long: {elapsed:?}");
        assert_eq!(broker.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_is_acknowledged() {
        let stream = Arc::new(MemoryStream::new());
        let broker = start(&stream).await;

        let err = broker
            .send("test", vec![ChatMessage::user("slow")])
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Timeout));

        answer_next(&stream, |request| {
            ResponseMessage::completion(&request.id, &ChatCompletionResponse::new("test", "late"))
                .unwrap()
        })
        .await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(stream
            .pending("response_stream", broker.response_group(), 10)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(stream.len("response_stream").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_response_stays_pending_until_janitor() {
        let stream = Arc::new(MemoryStream::new());
        let broker = start(&stream).await;

        let foreign = ResponseMessage::error("another-gateway-call", "x");
        stream
            .publish("response_stream", &foreign.to_fields())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        let pending = stream
            .pending("response_stream", broker.response_group(), 10)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].consumer, "Response_Worker");

        // Orphan TTL is 120 s and the janitor runs every 30 s
        tokio::time::sleep(Duration::from_secs(200)).await;
        assert!(stream
            .pending("response_stream", broker.response_group(), 10)
            .await
            .unwrap()
            .is_empty());
        drop(broker);
    }

    #[tokio::test]
    async fn test_dropped_call_abandons_slot() {
        let stream = Arc::new(MemoryStream::new());
        let broker = start(&stream).await;

        let call = broker.send("test", vec![ChatMessage::user("bye")]);
        let _ = tokio::time::timeout(Duration::from_millis(50), call).await;
        assert_eq!(broker.in_flight(), 0);

        // The answer still arrives and is cleaned up as a late response.
        answer_next(&stream, |request| ResponseMessage::error(&request.id, "x")).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(stream
            .pending("response_stream", broker.response_group(), 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_each_broker_owns_a_group() {
        let stream = Arc::new(MemoryStream::new());
        let first = start(&stream).await;
        let second = start(&stream).await;

        assert!(first.response_group().starts_with("response_group-"));
        assert_ne!(first.response_group(), second.response_group());

        first.shutdown().await;
        assert!(matches!(
            stream
                .pending("response_stream", first.response_group(), 10)
                .await,
            Err(StreamError::NoGroup { .. })
        ));
        assert!(stream
            .pending("response_stream", second.response_group(), 10)
            .await
            .is_ok());
    }

    #[test]
    fn test_reply_error_mapping() {
        let failed: BrokerError = ReplyError::Failed("quota".to_string()).into();
        assert!(matches!(failed, BrokerError::Inference(m) if m == "quota"));

        let malformed: BrokerError = ReplyError::Malformed("bad".to_string()).into();
        assert!(matches!(malformed, BrokerError::MalformedResponse(_)));
    }
}
