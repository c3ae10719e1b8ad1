//! Consumer-group message log
//!
//! The coordinator, hosts and guests only talk to each other through a
//! durable, append-only, per-topic log with consumer groups:
//! - every group on a topic sees every entry (broadcast across groups)
//! - consumers inside one group compete for entries
//! - an entry stays pending in its group until acknowledged; pending entries
//!   idle for longer than the log's claim interval are delivered again
//!
//! Delivery is at-least-once. Consumers must tolerate duplicates.

use std::time::Duration;

use async_trait::async_trait;
use cv_common::{FieldMap, WireRecord};

pub mod error;
pub mod memory;

#[cfg(feature = "redis")]
pub mod redis_stream;

pub use error::LogError;
pub use memory::MemoryLog;

#[cfg(feature = "redis")]
pub use redis_stream::RedisStreamLog;

pub type Result<T> = std::result::Result<T, LogError>;

/// One entry handed out by [`MessageLog::consume`].
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Broker-assigned id, used to acknowledge the entry
    pub message_id: String,
    pub fields: FieldMap,
}

/// The broker contract every participant relies on.
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Backend name for logs and health output
    fn backend(&self) -> &str;

    /// Check the broker is reachable
    async fn ping(&self) -> Result<()>;

    /// Append a record to `topic`, returning the broker-assigned message id
    async fn publish(&self, topic: &str, fields: FieldMap) -> Result<String>;

    /// Create `group` on `topic` (and the topic itself) if missing.
    /// A new group starts at the beginning of the topic.
    async fn ensure_group(&self, topic: &str, group: &str) -> Result<()>;

    /// Blocking poll. Returns at most `max_count` entries: first pending
    /// entries of the group that are due for redelivery, then new ones.
    /// Returns an empty list once `block` elapses without entries.
    async fn consume(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        max_count: usize,
        block: Duration,
    ) -> Result<Vec<LogEntry>>;

    /// Mark an entry processed for `group`. Acknowledging an unknown or
    /// already acknowledged id is not an error.
    async fn acknowledge(&self, topic: &str, group: &str, message_id: &str) -> Result<()>;
}

/// Encode and publish a typed record.
pub async fn publish_record<R: WireRecord>(
    log: &dyn MessageLog,
    topic: &str,
    record: &R,
) -> Result<String> {
    log.publish(topic, record.to_fields()).await
}
