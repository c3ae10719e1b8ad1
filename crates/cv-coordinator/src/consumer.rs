//! Consumption loop
//!
//! Polls one topic through one consumer group and feeds each decoded record
//! to a [`RecordHandler`]. Entries are acknowledged only after the handler
//! succeeds; a failed entry stays pending and is redelivered by the log.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cv_common::WireRecord;
use cv_log::MessageLog;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::metrics;

/// Processes one decoded record.
#[async_trait]
pub trait RecordHandler: Send + Sync + 'static {
    type Record: WireRecord + Send + 'static;

    async fn handle(&self, record: Self::Record) -> Result<()>;
}

/// Where and how a loop polls.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub topic: String,
    pub group: String,
    pub consumer: String,
    pub max_count: usize,
    /// Upper bound of one blocking poll
    pub block: Duration,
    /// Pause after a broker or processing failure
    pub error_backoff: Duration,
}

pub struct ConsumptionLoop<H: RecordHandler> {
    log: Arc<dyn MessageLog>,
    handler: Arc<H>,
    settings: LoopSettings,
    _record: PhantomData<fn() -> H::Record>,
}

impl<H: RecordHandler> ConsumptionLoop<H> {
    pub fn new(log: Arc<dyn MessageLog>, handler: Arc<H>, settings: LoopSettings) -> Self {
        Self {
            log,
            handler,
            settings,
            _record: PhantomData,
        }
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Poll until `shutdown` turns true or its sender goes away. The flag is
    /// checked between poll cycles, so an entry already handed out is always
    /// handled (and acknowledged, or left pending) before the loop exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let s = &self.settings;
        info!(topic = %s.topic, group = %s.group, consumer = %s.consumer, "Consumption loop started");

        while !*shutdown.borrow() {
            if let Err(e) = self.poll_once().await {
                error!(
                    topic = %s.topic,
                    consumer = %s.consumer,
                    error = %e,
                    backoff_ms = s.error_backoff.as_millis() as u64,
                    "Poll cycle failed, backing off"
                );
                tokio::select! {
                    _ = tokio::time::sleep(s.error_backoff) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            if shutdown.has_changed().is_err() {
                break;
            }
        }

        info!(topic = %s.topic, consumer = %s.consumer, "Consumption loop stopped");
    }

    /// One poll cycle. Returns how many entries were handled and acknowledged.
    ///
    /// A handler failure stops the cycle; that entry and any later entries of
    /// the same batch stay pending.
    pub async fn poll_once(&self) -> Result<usize> {
        let s = &self.settings;
        let entries = self
            .log
            .consume(&s.topic, &s.group, &s.consumer, s.max_count, s.block)
            .await?;
        metrics::record_consumer_poll(&s.topic);

        let mut handled = 0;
        for entry in entries {
            let record = match H::Record::from_fields(entry.fields) {
                Ok(record) => record,
                Err(e) => {
                    error!(
                        topic = %s.topic,
                        message_id = %entry.message_id,
                        error = %e,
                        "Undecodable entry, acknowledging and skipping"
                    );
                    metrics::record_poison_message(&s.topic);
                    self.log.acknowledge(&s.topic, &s.group, &entry.message_id).await?;
                    continue;
                }
            };

            self.handler.handle(record).await?;
            self.log.acknowledge(&s.topic, &s.group, &entry.message_id).await?;
            debug!(topic = %s.topic, message_id = %entry.message_id, "Entry acknowledged");
            handled += 1;
        }

        Ok(handled)
    }
}
