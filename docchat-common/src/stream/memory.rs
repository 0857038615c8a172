//! In-process stream transport with consumer-group semantics.
//!
//! Used for tests and single-process deployments. Mirrors the subset of Redis
//! Streams behaviour the broker and workers rely on: monotonically increasing
//! ids, per-group delivery cursors and pending lists, blocking group reads.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{
    BlockMode, EntryId, Fields, GroupStart, PendingEntry, Result, StreamEntry, StreamError,
    StreamTransport,
};

/// In-memory implementation of [`StreamTransport`].
pub struct MemoryStream {
    channels: Mutex<HashMap<String, Channel>>,
    /// Woken on every publish so blocked readers can re-check their cursor.
    notify: Notify,
}

#[derive(Default)]
struct Channel {
    entries: Vec<StoredEntry>,
    groups: HashMap<String, Group>,
    last_id: (i64, u64),
}

struct StoredEntry {
    id: EntryId,
    fields: Fields,
}

#[derive(Default)]
struct Group {
    /// Index of the next never-delivered entry.
    cursor: usize,
    /// Keyed by entry index so listing is oldest first.
    pending: BTreeMap<usize, Delivery>,
}

struct Delivery {
    consumer: String,
    delivered_at: Instant,
    deliveries: u64,
}

impl Channel {
    fn next_id(&mut self) -> EntryId {
        let now = chrono::Utc::now().timestamp_millis();
        let (last_ms, last_seq) = self.last_id;
        self.last_id = if now > last_ms {
            (now, 0)
        } else {
            (last_ms, last_seq + 1)
        };
        EntryId::new(format!("{}-{}", self.last_id.0, self.last_id.1))
    }

    fn index_of(&self, id: &EntryId) -> Option<usize> {
        self.entries.iter().position(|e| &e.id == id)
    }
}

impl MemoryStream {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            notify: Notify::new(),
        }
    }

    /// Number of entries ever appended to a channel.
    pub async fn len(&self, channel: &str) -> usize {
        let channels = self.channels.lock().await;
        channels.get(channel).map(|c| c.entries.len()).unwrap_or(0)
    }

    /// Snapshot of every entry in a channel, delivered or not.
    pub async fn entries(&self, channel: &str) -> Vec<StreamEntry> {
        let channels = self.channels.lock().await;
        channels
            .get(channel)
            .map(|c| {
                c.entries
                    .iter()
                    .map(|e| StreamEntry {
                        id: e.id.clone(),
                        fields: e.fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Deliver new entries to `consumer`, or nothing if the cursor is at the end.
    async fn take_new(
        &self,
        channel: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut channels = self.channels.lock().await;
        let no_group = || StreamError::NoGroup {
            channel: channel.to_string(),
            group: group.to_string(),
        };
        let chan = channels.get_mut(channel).ok_or_else(no_group)?;
        let Channel {
            entries, groups, ..
        } = chan;
        let grp = groups.get_mut(group).ok_or_else(no_group)?;

        let end = (grp.cursor + count).min(entries.len());
        let now = Instant::now();
        let mut delivered = Vec::with_capacity(end - grp.cursor);
        for index in grp.cursor..end {
            let entry = &entries[index];
            grp.pending.insert(
                index,
                Delivery {
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    deliveries: 1,
                },
            );
            delivered.push(StreamEntry {
                id: entry.id.clone(),
                fields: entry.fields.clone(),
            });
        }
        grp.cursor = end;

        Ok(delivered)
    }
}

impl Default for MemoryStream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamTransport for MemoryStream {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn create_group(&self, channel: &str, group: &str, start: GroupStart) -> Result<()> {
        let mut channels = self.channels.lock().await;
        let chan = channels.entry(channel.to_string()).or_default();
        let cursor = match start {
            GroupStart::Beginning => 0,
            GroupStart::Latest => chan.entries.len(),
        };
        chan.groups.entry(group.to_string()).or_insert_with(|| Group {
            cursor,
            pending: BTreeMap::new(),
        });
        Ok(())
    }

    async fn remove_group(&self, channel: &str, group: &str) -> Result<()> {
        let mut channels = self.channels.lock().await;
        if let Some(chan) = channels.get_mut(channel) {
            chan.groups.remove(group);
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, fields: &Fields) -> Result<EntryId> {
        let id = {
            let mut channels = self.channels.lock().await;
            let chan = channels.entry(channel.to_string()).or_default();
            let id = chan.next_id();
            chan.entries.push(StoredEntry {
                id: id.clone(),
                fields: fields.clone(),
            });
            id
        };
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn consume_group(
        &self,
        channel: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: BlockMode,
    ) -> Result<Vec<StreamEntry>> {
        let deadline = match block {
            BlockMode::Timeout(wait) => Some(Instant::now() + wait),
            BlockMode::NoWait | BlockMode::Forever => None,
        };

        loop {
            // Registered before checking so a publish in between is not missed.
            let notified = self.notify.notified();

            let entries = self.take_new(channel, group, consumer, count).await?;
            if !entries.is_empty() || block == BlockMode::NoWait {
                return Ok(entries);
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(Vec::new());
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn acknowledge(&self, channel: &str, group: &str, id: &EntryId) -> Result<()> {
        let mut channels = self.channels.lock().await;
        if let Some(chan) = channels.get_mut(channel) {
            if let Some(index) = chan.index_of(id) {
                if let Some(grp) = chan.groups.get_mut(group) {
                    grp.pending.remove(&index);
                }
            }
        }
        Ok(())
    }

    async fn pending(&self, channel: &str, group: &str, count: usize) -> Result<Vec<PendingEntry>> {
        let channels = self.channels.lock().await;
        let no_group = || StreamError::NoGroup {
            channel: channel.to_string(),
            group: group.to_string(),
        };
        let chan = channels.get(channel).ok_or_else(no_group)?;
        let grp = chan.groups.get(group).ok_or_else(no_group)?;

        Ok(grp
            .pending
            .iter()
            .take(count)
            .map(|(index, delivery)| PendingEntry {
                id: chan.entries[*index].id.clone(),
                consumer: delivery.consumer.clone(),
                idle: delivery.delivered_at.elapsed(),
                deliveries: delivery.deliveries,
            })
            .collect())
    }
}
