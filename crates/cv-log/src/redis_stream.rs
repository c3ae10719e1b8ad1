//! Redis Streams backend.
//!
//! Topics are streams, groups are stream consumer groups. Redelivery of idle
//! pending entries uses XAUTOCLAIM before falling back to a blocking
//! XREADGROUP for new entries.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{StreamAutoClaimReply, StreamId, StreamReadReply};
use redis::{Client, RedisError, Value};
use tracing::{debug, info, warn};

use cv_common::FieldMap;
use crate::{LogEntry, LogError, MessageLog, Result};

/// Message log backed by Redis Streams.
pub struct RedisStreamLog {
    client: Client,
    /// Shared connection for short commands
    conn: ConnectionManager,
    /// One connection per consumer so a blocking read only stalls its own loop
    blocking: DashMap<String, MultiplexedConnection>,
    claim_idle: Duration,
}

impl RedisStreamLog {
    pub async fn connect(url: &str, claim_idle: Duration) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| LogError::Connection(format!("invalid redis url: {}", e)))?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| LogError::Connection(e.to_string()))?;

        info!(url = %url, "Connected to Redis");

        Ok(Self {
            client,
            conn,
            blocking: DashMap::new(),
            claim_idle,
        })
    }

    async fn blocking_connection(&self, consumer: &str) -> Result<MultiplexedConnection> {
        if let Some(conn) = self.blocking.get(consumer) {
            return Ok(conn.clone());
        }

        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| LogError::Connection(e.to_string()))?;
        self.blocking.insert(consumer.to_string(), conn.clone());
        Ok(conn)
    }

    /// Translate a redis error, forgetting the consumer's connection when it broke.
    fn classify(&self, err: RedisError, topic: &str, group: &str, consumer: &str) -> LogError {
        if err.code() == Some("NOGROUP") {
            return LogError::NoSuchGroup {
                topic: topic.to_string(),
                group: group.to_string(),
            };
        }
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            warn!(consumer = %consumer, error = %err, "Dropping broken consumer connection");
            self.blocking.remove(consumer);
            return LogError::Connection(err.to_string());
        }
        LogError::Redis(err)
    }

    async fn claim_idle_entries(
        &self,
        conn: &mut MultiplexedConnection,
        topic: &str,
        group: &str,
        consumer: &str,
        max_count: usize,
    ) -> std::result::Result<Vec<LogEntry>, RedisError> {
        let reply: StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(topic)
            .arg(group)
            .arg(consumer)
            .arg(self.claim_idle.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(max_count)
            .query_async(conn)
            .await?;

        if !reply.claimed.is_empty() {
            debug!(
                topic = %topic,
                group = %group,
                consumer = %consumer,
                claimed = reply.claimed.len(),
                "Claimed idle pending entries"
            );
        }

        reply.claimed.into_iter().map(to_entry).collect()
    }
}

fn to_entry(id: StreamId) -> std::result::Result<LogEntry, RedisError> {
    let mut fields = FieldMap::new();
    for (key, value) in id.map {
        let value: String = match value {
            Value::Nil => String::new(),
            other => redis::from_redis_value(&other)?,
        };
        fields.insert(key, value);
    }
    Ok(LogEntry {
        message_id: id.id,
        fields,
    })
}

#[async_trait]
impl MessageLog for RedisStreamLog {
    fn backend(&self) -> &str {
        "redis"
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| LogError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn publish(&self, topic: &str, fields: FieldMap) -> Result<String> {
        let mut conn = self.conn.clone();
        let items: Vec<(String, String)> = fields.into_iter().collect();

        let message_id: String = redis::cmd("XADD")
            .arg(topic)
            .arg("*")
            .arg(items.as_slice())
            .query_async(&mut conn)
            .await?;

        debug!(topic = %topic, message_id = %message_id, "Published entry");
        Ok(message_id)
    }

    async fn ensure_group(&self, topic: &str, group: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let result: std::result::Result<(), RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(topic)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => {
                info!(topic = %topic, group = %group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!(topic = %topic, group = %group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn consume(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        max_count: usize,
        block: Duration,
    ) -> Result<Vec<LogEntry>> {
        let mut conn = self.blocking_connection(consumer).await?;

        let claimed = self
            .claim_idle_entries(&mut conn, topic, group, consumer, max_count)
            .await
            .map_err(|e| self.classify(e, topic, group, consumer))?;
        if !claimed.is_empty() {
            return Ok(claimed);
        }

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(max_count)
            .arg("BLOCK")
            .arg((block.as_millis() as u64).max(1))
            .arg("STREAMS")
            .arg(topic)
            .arg(">")
            .query_async(&mut conn)
            .await
            .map_err(|e| self.classify(e, topic, group, consumer))?;

        let Some(reply) = reply else {
            return Ok(Vec::new());
        };

        let mut entries = Vec::new();
        for key in reply.keys {
            for id in key.ids {
                entries.push(to_entry(id)?);
            }
        }
        Ok(entries)
    }

    async fn acknowledge(&self, topic: &str, group: &str, message_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let acked: i64 = redis::cmd("XACK")
            .arg(topic)
            .arg(group)
            .arg(message_id)
            .query_async(&mut conn)
            .await?;

        if acked == 0 {
            debug!(topic = %topic, group = %group, message_id = %message_id, "Entry was not pending");
        }
        Ok(())
    }
}

impl std::fmt::Debug for RedisStreamLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamLog")
            .field("claim_idle", &self.claim_idle)
            .field("consumers", &self.blocking.len())
            .finish()
    }
}
