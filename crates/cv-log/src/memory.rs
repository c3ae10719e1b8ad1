//! In-process message log with consumer-group semantics.
//!
//! Mirrors the Redis Streams model closely enough to drive the coordinator in
//! tests and in the embedded backend: per-topic entry lists, per-group cursors,
//! per-group pending lists, and idle-based redelivery. Nothing survives the
//! process.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use cv_common::FieldMap;
use crate::{LogEntry, LogError, MessageLog, Result};

#[derive(Default)]
struct Topic {
    entries: Vec<LogEntry>,
    /// Entry index by message id
    index: HashMap<String, usize>,
    groups: HashMap<String, Group>,
}

#[derive(Default)]
struct Group {
    /// Index of the next never-delivered entry
    cursor: usize,
    /// Delivered but unacknowledged entries, keyed by entry index
    pending: BTreeMap<usize, Delivery>,
}

struct Delivery {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u32,
}

/// Message log held entirely in memory.
pub struct MemoryLog {
    topics: Mutex<HashMap<String, Topic>>,
    published: Notify,
    claim_idle: Duration,
    running: AtomicBool,
}

impl MemoryLog {
    /// Pending entries are redelivered after `claim_idle` without an ack.
    pub fn new(claim_idle: Duration) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            published: Notify::new(),
            claim_idle,
            running: AtomicBool::new(true),
        }
    }

    /// Every entry ever published to `topic`, in order.
    pub fn entries(&self, topic: &str) -> Vec<LogEntry> {
        self.topics
            .lock()
            .get(topic)
            .map(|t| t.entries.clone())
            .unwrap_or_default()
    }

    /// Number of delivered but unacknowledged entries in `group`.
    pub fn pending_count(&self, topic: &str, group: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .and_then(|t| t.groups.get(group))
            .map(|g| g.pending.len())
            .unwrap_or(0)
    }

    /// Entries of `topic` that `group` has not finished with: never delivered
    /// plus delivered but unacknowledged.
    pub fn outstanding(&self, topic: &str, group: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .and_then(|t| t.groups.get(group).map(|g| t.entries.len() - g.cursor + g.pending.len()))
            .unwrap_or(0)
    }

    /// How many times the entry has been handed out in `group`.
    pub fn delivery_count(&self, topic: &str, group: &str, message_id: &str) -> u32 {
        let topics = self.topics.lock();
        let Some(t) = topics.get(topic) else { return 0 };
        let Some(index) = t.index.get(message_id) else { return 0 };
        t.groups
            .get(group)
            .and_then(|g| g.pending.get(index))
            .map(|d| d.delivery_count)
            .unwrap_or(0)
    }

    /// Reject every further operation with [`LogError::Stopped`].
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.published.notify_waiters();
    }

    fn check_running(&self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LogError::Stopped)
        }
    }

    /// Take due pending entries, then new entries, without waiting.
    fn take_available(&self, topic: &str, group: &str, consumer: &str, max_count: usize) -> Result<Vec<LogEntry>> {
        let mut topics = self.topics.lock();
        let no_group = || LogError::NoSuchGroup {
            topic: topic.to_string(),
            group: group.to_string(),
        };
        let t = topics.get_mut(topic).ok_or_else(no_group)?;
        let g = t.groups.get_mut(group).ok_or_else(no_group)?;

        let now = Instant::now();
        let mut taken = Vec::new();

        for (index, delivery) in g.pending.iter_mut() {
            if taken.len() >= max_count {
                break;
            }
            if now.duration_since(delivery.delivered_at) >= self.claim_idle {
                debug!(
                    topic = %topic,
                    group = %group,
                    consumer = %consumer,
                    previous_consumer = %delivery.consumer,
                    "Redelivering idle pending entry"
                );
                delivery.consumer = consumer.to_string();
                delivery.delivered_at = now;
                delivery.delivery_count += 1;
                taken.push(t.entries[*index].clone());
            }
        }

        while taken.len() < max_count && g.cursor < t.entries.len() {
            let index = g.cursor;
            g.cursor += 1;
            g.pending.insert(index, Delivery {
                consumer: consumer.to_string(),
                delivered_at: now,
                delivery_count: 1,
            });
            taken.push(t.entries[index].clone());
        }

        Ok(taken)
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl MessageLog for MemoryLog {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        self.check_running()
    }

    async fn publish(&self, topic: &str, fields: FieldMap) -> Result<String> {
        self.check_running()?;

        let message_id = {
            let mut topics = self.topics.lock();
            let t = topics.entry(topic.to_string()).or_default();
            let message_id = format!("{}-{}", Utc::now().timestamp_millis(), t.entries.len());
            t.index.insert(message_id.clone(), t.entries.len());
            t.entries.push(LogEntry {
                message_id: message_id.clone(),
                fields,
            });
            message_id
        };

        self.published.notify_waiters();
        debug!(topic = %topic, message_id = %message_id, "Published entry");
        Ok(message_id)
    }

    async fn ensure_group(&self, topic: &str, group: &str) -> Result<()> {
        self.check_running()?;

        let mut topics = self.topics.lock();
        topics
            .entry(topic.to_string())
            .or_default()
            .groups
            .entry(group.to_string())
            .or_default();
        Ok(())
    }

    async fn consume(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        max_count: usize,
        block: Duration,
    ) -> Result<Vec<LogEntry>> {
        let deadline = Instant::now() + block;

        loop {
            self.check_running()?;

            // Register interest before looking so a publish in between is not missed
            let notified = self.published.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let taken = self.take_available(topic, group, consumer, max_count)?;
            if !taken.is_empty() {
                return Ok(taken);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }

            // Wake early enough to notice pending entries becoming due
            let wait = (deadline - now).min(self.claim_idle.max(Duration::from_millis(1)));
            let _ = tokio::time::timeout(wait, notified).await;
        }
    }

    async fn acknowledge(&self, topic: &str, group: &str, message_id: &str) -> Result<()> {
        self.check_running()?;

        let mut topics = self.topics.lock();
        let Some(t) = topics.get_mut(topic) else { return Ok(()) };
        let Some(&index) = t.index.get(message_id) else {
            return Ok(());
        };
        if let Some(g) = t.groups.get_mut(group) {
            g.pending.remove(&index);
        }
        Ok(())
    }
}
