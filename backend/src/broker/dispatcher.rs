//! Response dispatcher and janitor.
//!
//! One dispatcher task per process reads the response group with a single
//! consumer identity and routes each entry to the call waiting for its `id`.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use docchat_common::protocol::correlation_id;
use docchat_common::{BlockMode, ResponseMessage, StreamConfig, StreamEntry, StreamTransport};
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Pending entries inspected per janitor sweep.
const JANITOR_BATCH: usize = 100;

/// Outcome of routing one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Handed to a waiting call.
    Delivered,
    /// Belongs to a call of this process that already gave up.
    Late,
    /// Not a call of this process.
    Unknown,
}

/// Waiter table shared by `send()` calls and the dispatcher.
#[derive(Default)]
pub(crate) struct PendingCalls {
    waiters: DashMap<String, oneshot::Sender<ResponseMessage>>,
    /// Ids of abandoned calls and when they were abandoned.
    expired: DashMap<String, Instant>,
}

impl PendingCalls {
    pub(crate) fn register(&self, id: &str) -> oneshot::Receiver<ResponseMessage> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(id.to_string(), tx);
        rx
    }

    /// Forget the waiter and remember the id so a late answer gets acknowledged.
    pub(crate) fn abandon(&self, id: &str) {
        if self.waiters.remove(id).is_some() {
            self.expired.insert(id.to_string(), Instant::now());
        }
    }

    pub(crate) fn deliver(&self, response: ResponseMessage) -> Delivery {
        if let Some((_, tx)) = self.waiters.remove(&response.id) {
            return match tx.send(response) {
                Ok(()) => Delivery::Delivered,
                // Receiver went away between the lookup and the send
                Err(_) => Delivery::Late,
            };
        }

        if self.expired.remove(&response.id).is_some() {
            Delivery::Late
        } else {
            Delivery::Unknown
        }
    }

    /// Drop expired ids older than `ttl`. Returns how many were removed.
    pub(crate) fn prune_expired(&self, ttl: Duration) -> usize {
        let before = self.expired.len();
        self.expired.retain(|_, abandoned_at| abandoned_at.elapsed() < ttl);
        before - self.expired.len()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.waiters.len()
    }

    pub(crate) fn expired(&self) -> usize {
        self.expired.len()
    }
}

/// Abandons the waiter slot unless the call completed.
///
/// Covers both the deadline path and a caller dropping the `send` future.
pub(crate) struct WaiterGuard<'a> {
    calls: &'a PendingCalls,
    id: String,
    armed: bool,
}

impl<'a> WaiterGuard<'a> {
    pub(crate) fn new(calls: &'a PendingCalls, id: impl Into<String>) -> Self {
        Self {
            calls,
            id: id.into(),
            armed: true,
        }
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.calls.abandon(&self.id);
        }
    }
}

/// Shared context of the dispatcher and janitor tasks.
pub(crate) struct Dispatcher {
    pub(crate) transport: Arc<dyn StreamTransport>,
    pub(crate) streams: StreamConfig,
    pub(crate) calls: Arc<PendingCalls>,
    pub(crate) block: BlockMode,
    pub(crate) retry_delay: Duration,
}

impl Dispatcher {
    pub(crate) async fn run(&self) {
        tracing::info!(
            "Response dispatcher reading {} as {}/{}",
            self.streams.response_stream,
            self.streams.response_group,
            self.streams.response_consumer
        );

        loop {
            let read = self
                .transport
                .consume_group(
                    &self.streams.response_stream,
                    &self.streams.response_group,
                    &self.streams.response_consumer,
                    1,
                    self.block,
                )
                .await;

            match read {
                Ok(entries) => {
                    for entry in entries {
                        self.route(entry).await;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to read responses: {}", e);
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    async fn route(&self, entry: StreamEntry) {
        let response = match correlation_id(&entry.fields)
            .and_then(|_| ResponseMessage::from_fields(&entry.fields).ok())
        {
            Some(response) => response,
            None => {
                tracing::warn!("Discarding junk response entry {}", entry.id);
                self.acknowledge(&entry).await;
                return;
            }
        };

        let id = response.id.clone();
        match self.calls.deliver(response) {
            Delivery::Delivered => {
                tracing::debug!("Response {} delivered", id);
                self.acknowledge(&entry).await;
            }
            Delivery::Late => {
                tracing::warn!("Late response {} for a call that already timed out", id);
                self.acknowledge(&entry).await;
            }
            Delivery::Unknown => {
                tracing::debug!("Response {} is not for this process, leaving it pending", id);
            }
        }
    }

    async fn acknowledge(&self, entry: &StreamEntry) {
        if let Err(e) = self
            .transport
            .acknowledge(
                &self.streams.response_stream,
                &self.streams.response_group,
                &entry.id,
            )
            .await
        {
            tracing::warn!("Failed to acknowledge response entry {}: {}", entry.id, e);
        }
    }

    /// Periodically acknowledge responses nobody in this process will claim.
    pub(crate) async fn run_janitor(&self, interval: Duration, orphan_ttl: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.sweep(orphan_ttl).await;
        }
    }

    pub(crate) async fn sweep(&self, orphan_ttl: Duration) -> usize {
        let pending = match self
            .transport
            .pending(
                &self.streams.response_stream,
                &self.streams.response_group,
                JANITOR_BATCH,
            )
            .await
        {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!("Janitor failed to list pending responses: {}", e);
                return 0;
            }
        };

        let mut expired = 0;
        for entry in pending
            .iter()
            .filter(|p| p.consumer == self.streams.response_consumer && p.idle >= orphan_ttl)
        {
            match self
                .transport
                .acknowledge(
                    &self.streams.response_stream,
                    &self.streams.response_group,
                    &entry.id,
                )
                .await
            {
                Ok(()) => {
                    tracing::warn!(
                        "Expired orphaned response entry {} (idle {}s)",
                        entry.id,
                        entry.idle.as_secs()
                    );
                    expired += 1;
                }
                Err(e) => tracing::warn!("Failed to expire response entry {}: {}", entry.id, e),
            }
        }

        let pruned = self.calls.prune_expired(orphan_ttl);
        if pruned > 0 {
            tracing::debug!("Forgot {} timed-out call id(s)", pruned);
        }

        expired
    }
}
