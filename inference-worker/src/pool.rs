//! Several workers sharing one process.

use std::sync::Arc;

use docchat_common::{StreamConfig, StreamTransport};
use futures_util::future::join_all;
use tokio::sync::watch;

use crate::config::WorkerSettings;
use crate::engine::InferenceEngine;
use crate::worker::Worker;

pub struct WorkerPool {
    workers: Vec<Arc<Worker>>,
}

impl WorkerPool {
    /// Build `settings.concurrency` workers (at least one).
    ///
    /// A single worker uses the configured consumer name as is; otherwise
    /// each gets a `-<n>` suffix so the group can tell them apart.
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        engine: Arc<dyn InferenceEngine>,
        streams: StreamConfig,
        settings: WorkerSettings,
    ) -> Self {
        let count = settings.concurrency.max(1);
        let workers = (1..=count)
            .map(|n| {
                let consumer = if count == 1 {
                    streams.request_consumer.clone()
                } else {
                    format!("{}-{}", streams.request_consumer, n)
                };
                Arc::new(Worker::new(
                    transport.clone(),
                    engine.clone(),
                    streams.clone(),
                    settings.clone(),
                    consumer,
                ))
            })
            .collect();

        Self { workers }
    }

    pub fn consumers(&self) -> Vec<&str> {
        self.workers.iter().map(|w| w.consumer()).collect()
    }

    /// Run every worker until shutdown is signalled.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        tracing::info!("Starting {} worker(s)", self.workers.len());

        let handles = self.workers.iter().map(|worker| {
            let worker = worker.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { worker.run(shutdown).await })
        });

        for result in join_all(handles).await {
            if let Err(e) = result {
                tracing::error!("Worker task failed: {}", e);
            }
        }
    }
}
