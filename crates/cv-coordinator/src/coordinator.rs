//! Coordinator lifecycle
//!
//! Wires the dispatcher and aggregator to their two consumption loops and
//! owns the shared workflow store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cv_config::AppConfig;
use cv_log::MessageLog;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::aggregator::Aggregator;
use crate::consumer::{ConsumptionLoop, LoopSettings};
use crate::directory::RecipientDirectory;
use crate::dispatcher::Dispatcher;
use crate::error::{CoordinatorError, Result};
use crate::store::WorkflowStore;

/// Topic, group and polling settings for both loops.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub invitation_topic: String,
    pub response_topic: String,
    pub summary_topic: String,
    pub group: String,
    pub invitation_consumer: String,
    pub response_consumer: String,
    pub max_count: usize,
    pub block: Duration,
    pub error_backoff: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl CoordinatorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            invitation_topic: config.topics.invitations.clone(),
            response_topic: config.topics.responses.clone(),
            summary_topic: config.topics.summaries.clone(),
            group: config.topics.coordinator_group.clone(),
            invitation_consumer: config.coordinator.invitation_consumer.clone(),
            response_consumer: config.coordinator.response_consumer.clone(),
            max_count: config.coordinator.max_count,
            block: Duration::from_millis(config.coordinator.block_ms),
            error_backoff: Duration::from_millis(config.coordinator.error_backoff_ms),
        }
    }

    fn invitation_loop(&self) -> LoopSettings {
        LoopSettings {
            topic: self.invitation_topic.clone(),
            group: self.group.clone(),
            consumer: self.invitation_consumer.clone(),
            max_count: self.max_count,
            block: self.block,
            error_backoff: self.error_backoff,
        }
    }

    fn response_loop(&self) -> LoopSettings {
        LoopSettings {
            topic: self.response_topic.clone(),
            group: self.group.clone(),
            consumer: self.response_consumer.clone(),
            max_count: self.max_count,
            block: self.block,
            error_backoff: self.error_backoff,
        }
    }
}

pub struct Coordinator {
    log: Arc<dyn MessageLog>,
    store: Arc<WorkflowStore>,
    dispatcher: Arc<Dispatcher>,
    aggregator: Arc<Aggregator>,
    settings: CoordinatorSettings,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    initialized: AtomicBool,
}

impl Coordinator {
    pub fn new(
        log: Arc<dyn MessageLog>,
        directory: Arc<dyn RecipientDirectory>,
        settings: CoordinatorSettings,
    ) -> Self {
        let store = Arc::new(WorkflowStore::new());
        let dispatcher = Arc::new(Dispatcher::new(
            log.clone(),
            store.clone(),
            directory,
            settings.invitation_topic.clone(),
        ));
        let aggregator = Arc::new(Aggregator::new(
            log.clone(),
            store.clone(),
            settings.summary_topic.clone(),
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            log,
            store,
            dispatcher,
            aggregator,
            settings,
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<WorkflowStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Create the coordinator group on both inbound topics. Failure here is
    /// fatal to startup.
    pub async fn initialize(&self) -> Result<()> {
        let s = &self.settings;
        for topic in [&s.invitation_topic, &s.response_topic] {
            self.log.ensure_group(topic, &s.group).await?;
        }
        self.initialized.store(true, Ordering::SeqCst);

        info!(
            backend = self.log.backend(),
            invitations = %s.invitation_topic,
            responses = %s.response_topic,
            summaries = %s.summary_topic,
            group = %s.group,
            "Coordinator initialized"
        );
        Ok(())
    }

    /// Spawn both consumption loops.
    pub fn start(&self) -> Result<()> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(CoordinatorError::NotInitialized);
        }

        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return Err(CoordinatorError::AlreadyStarted);
        }

        let invitations = ConsumptionLoop::new(
            self.log.clone(),
            self.dispatcher.clone(),
            self.settings.invitation_loop(),
        );
        let responses = ConsumptionLoop::new(
            self.log.clone(),
            self.aggregator.clone(),
            self.settings.response_loop(),
        );

        handles.push(tokio::spawn(invitations.run(self.shutdown_tx.subscribe())));
        handles.push(tokio::spawn(responses.run(self.shutdown_tx.subscribe())));

        info!("Coordinator started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        let handles = self.handles.lock();
        !handles.is_empty() && handles.iter().all(|h| !h.is_finished())
    }

    /// Ask both loops to stop after their current poll cycle.
    pub fn stop(&self) {
        info!("Coordinator stopping");
        self.shutdown_tx.send_replace(true);
    }

    /// Wait for both loops to exit.
    pub async fn join(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Consumption loop task failed");
            }
        }

        let active = self.store.active_count().await;
        if active > 0 {
            warn!(active_workflows = active, "Coordinator stopped with incomplete workflows");
        }
        info!("Coordinator stopped");
    }
}
