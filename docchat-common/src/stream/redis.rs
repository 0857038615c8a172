//! Redis Streams transport.

use std::collections::HashMap;
use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::streams::{StreamPendingCountReply, StreamReadOptions, StreamReadReply};
use ::redis::{AsyncCommands, Client, Value};
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    BlockMode, EntryId, Fields, GroupStart, PendingEntry, Result, StreamEntry, StreamError,
    StreamTransport,
};

/// [`StreamTransport`] backed by Redis Streams.
///
/// Redis serves one connection's commands in order, so a parked `XREADGROUP`
/// stalls everything queued behind it on that connection. Publishes, acks and
/// group commands share one connection; each consumer name gets its own
/// connection for blocking reads, opened on its first read.
pub struct RedisStream {
    client: Client,
    commands: ConnectionManager,
    readers: Mutex<HashMap<String, ConnectionManager>>,
}

impl RedisStream {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let commands = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            client,
            commands,
            readers: Mutex::new(HashMap::new()),
        })
    }

    async fn reader(&self, consumer: &str) -> Result<ConnectionManager> {
        let mut readers = self.readers.lock().await;
        if let Some(conn) = readers.get(consumer) {
            return Ok(conn.clone());
        }
        let conn = ConnectionManager::new(self.client.clone()).await?;
        tracing::debug!("Opened read connection for consumer {}", consumer);
        readers.insert(consumer.to_string(), conn.clone());
        Ok(conn)
    }
}

fn start_id(start: GroupStart) -> &'static str {
    match start {
        GroupStart::Beginning => "0",
        GroupStart::Latest => "$",
    }
}

fn decode_fields(id: &str, map: HashMap<String, Value>) -> Result<Fields> {
    map.into_iter()
        .map(|(key, value)| {
            ::redis::from_redis_value::<String>(&value)
                .map(|v| (key.clone(), v))
                .map_err(|e| {
                    StreamError::MalformedEntry(format!("entry {} field '{}': {}", id, key, e))
                })
        })
        .collect()
}

fn is_no_group(err: &::redis::RedisError) -> bool {
    err.code() == Some("NOGROUP")
}

#[async_trait]
impl StreamTransport for RedisStream {
    fn kind(&self) -> &'static str {
        "redis"
    }

    async fn create_group(&self, channel: &str, group: &str, start: GroupStart) -> Result<()> {
        let mut conn = self.commands.clone();
        let created: ::redis::RedisResult<()> = conn
            .xgroup_create_mkstream(channel, group, start_id(start))
            .await;

        match created {
            Ok(()) => {
                tracing::info!("Created consumer group {} on {}", group, channel);
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                tracing::debug!("Consumer group {} already exists on {}", group, channel);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_group(&self, channel: &str, group: &str) -> Result<()> {
        let mut conn = self.commands.clone();
        let removed: bool = conn.xgroup_destroy(channel, group).await?;
        if removed {
            tracing::info!("Removed consumer group {} from {}", group, channel);
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, fields: &Fields) -> Result<EntryId> {
        let mut conn = self.commands.clone();
        let id: String = conn.xadd_map(channel, "*", fields).await?;
        Ok(EntryId::new(id))
    }

    async fn consume_group(
        &self,
        channel: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: BlockMode,
    ) -> Result<Vec<StreamEntry>> {
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count);
        let options = match block {
            BlockMode::NoWait => options,
            BlockMode::Timeout(wait) => options.block(wait.as_millis().max(1) as usize),
            BlockMode::Forever => options.block(0),
        };

        let mut conn = self.reader(consumer).await?;
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[channel], &[">"], &options)
            .await
            .map_err(|e| {
                if is_no_group(&e) {
                    StreamError::NoGroup {
                        channel: channel.to_string(),
                        group: group.to_string(),
                    }
                } else {
                    StreamError::Redis(e)
                }
            })?;

        let Some(reply) = reply else {
            return Ok(Vec::new());
        };

        let mut entries = Vec::new();
        for key in reply.keys {
            for stream_id in key.ids {
                let fields = decode_fields(&stream_id.id, stream_id.map)?;
                entries.push(StreamEntry {
                    id: EntryId::new(stream_id.id),
                    fields,
                });
            }
        }
        Ok(entries)
    }

    async fn acknowledge(&self, channel: &str, group: &str, id: &EntryId) -> Result<()> {
        let mut conn = self.commands.clone();
        let _acked: usize = conn.xack(channel, group, &[id.as_str()]).await?;
        Ok(())
    }

    async fn pending(&self, channel: &str, group: &str, count: usize) -> Result<Vec<PendingEntry>> {
        let mut conn = self.commands.clone();
        let reply: StreamPendingCountReply = conn
            .xpending_count(channel, group, "-", "+", count)
            .await
            .map_err(|e| {
                if is_no_group(&e) {
                    StreamError::NoGroup {
                        channel: channel.to_string(),
                        group: group.to_string(),
                    }
                } else {
                    StreamError::Redis(e)
                }
            })?;

        Ok(reply
            .ids
            .into_iter()
            .map(|p| PendingEntry {
                id: EntryId::new(p.id),
                consumer: p.consumer,
                idle: Duration::from_millis(p.last_delivered_ms as u64),
                deliveries: p.times_delivered as u64,
            })
            .collect())
    }
}
