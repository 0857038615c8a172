//! Durable, grouped message streams.
//!
//! A channel is an append-only log of flat string maps. Consumers read through
//! named groups: every entry is handed to exactly one consumer of a group and
//! stays in that group's pending list until it is acknowledged.

mod memory;
mod redis;

pub use self::memory::MemoryStream;
pub use self::redis::RedisStream;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{TransportConfig, TransportKind};

/// Flat field map carried by every stream entry.
pub type Fields = BTreeMap<String, String>;

/// Position of an entry within a channel (`<millis>-<seq>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryId(String);

impl EntryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An entry delivered by a group read.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: EntryId,
    pub fields: Fields,
}

/// Delivered-but-unacknowledged entry of a group.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub id: EntryId,
    pub consumer: String,
    pub idle: Duration,
    pub deliveries: u64,
}

/// How long a group read waits when nothing new is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMode {
    NoWait,
    Timeout(Duration),
    Forever,
}

impl BlockMode {
    /// Redis convention: zero blocks forever.
    pub fn from_millis(ms: u64) -> Self {
        if ms == 0 {
            BlockMode::Forever
        } else {
            BlockMode::Timeout(Duration::from_millis(ms))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Consumer group '{group}' does not exist on channel '{channel}'")]
    NoGroup { channel: String, group: String },

    #[error("Malformed stream entry: {0}")]
    MalformedEntry(String),
}

pub type Result<T> = std::result::Result<T, StreamError>;

/// Where a newly created group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStart {
    /// Every entry already in the channel is delivered.
    Beginning,
    /// Only entries appended after creation are delivered.
    Latest,
}

/// Transport contract shared by the gateway and the workers.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Short name used in logs (e.g. "redis", "memory").
    fn kind(&self) -> &'static str;

    /// Create the channel and group if absent, starting at `start`.
    /// Existing groups are left alone.
    async fn create_group(&self, channel: &str, group: &str, start: GroupStart) -> Result<()>;

    /// Create the channel and group if absent, reading from the beginning.
    async fn ensure_group(&self, channel: &str, group: &str) -> Result<()> {
        self.create_group(channel, group, GroupStart::Beginning).await
    }

    /// Delete a group and its pending list. Unknown groups on an existing channel are ignored.
    async fn remove_group(&self, channel: &str, group: &str) -> Result<()>;

    /// Append an entry and return its id.
    async fn publish(&self, channel: &str, fields: &Fields) -> Result<EntryId>;

    /// Read up to `count` never-delivered entries for `consumer`.
    ///
    /// Returned entries become pending for that consumer. An empty vector
    /// means the block elapsed without new entries.
    async fn consume_group(
        &self,
        channel: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: BlockMode,
    ) -> Result<Vec<StreamEntry>>;

    /// Remove an entry from the group's pending list.
    async fn acknowledge(&self, channel: &str, group: &str, id: &EntryId) -> Result<()>;

    /// List up to `count` pending entries of a group, oldest first.
    async fn pending(&self, channel: &str, group: &str, count: usize) -> Result<Vec<PendingEntry>>;
}

/// Build the transport selected by configuration.
pub async fn connect(config: &TransportConfig) -> Result<Arc<dyn StreamTransport>> {
    match config.kind {
        TransportKind::Redis => {
            let stream = RedisStream::connect(&config.url).await?;
            tracing::info!("Connected to Redis streams at {}", config.url);
            Ok(Arc::new(stream))
        }
        TransportKind::Memory => {
            tracing::warn!("Using in-memory stream transport; messages do not leave this process");
            Ok(Arc::new(MemoryStream::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_mode_from_millis() {
        assert_eq!(BlockMode::from_millis(0), BlockMode::Forever);
        assert_eq!(
            BlockMode::from_millis(250),
            BlockMode::Timeout(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_entry_id_display() {
        assert_eq!(EntryId::new("5-2").to_string(), "5-2");
        assert_eq!(EntryId::new("5-2").as_str(), "5-2");
    }
}
