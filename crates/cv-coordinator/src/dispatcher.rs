//! Invitation fan-out
//!
//! Expands each original invitation into one addressed copy per recipient
//! and registers the workflow the aggregator will complete.

use std::sync::Arc;

use async_trait::async_trait;
use cv_common::Invitation;
use cv_log::{publish_record, MessageLog};
use tracing::{debug, error, info, warn};

use crate::consumer::RecordHandler;
use crate::directory::RecipientDirectory;
use crate::error::Result;
use crate::metrics;
use crate::store::{WorkflowState, WorkflowStore};

/// What handling one inbound invitation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Workflow registered and one copy published per recipient
    Dispatched { recipients: usize },
    /// Workflow registered with nobody to ask; it will never complete
    EmptyRecipientSet,
    /// Redelivered original of a partially dispatched workflow; the copies
    /// that failed last time were published
    Resumed { recipients: usize },
    /// Original invitation for a workflow that is already fully dispatched
    Duplicate,
    /// One of our own addressed copies coming back
    OwnEcho,
    /// Addressed copy for a workflow this coordinator does not know
    UnknownWorkflow,
}

pub struct Dispatcher {
    log: Arc<dyn MessageLog>,
    store: Arc<WorkflowStore>,
    directory: Arc<dyn RecipientDirectory>,
    invitation_topic: String,
}

impl Dispatcher {
    pub fn new(
        log: Arc<dyn MessageLog>,
        store: Arc<WorkflowStore>,
        directory: Arc<dyn RecipientDirectory>,
        invitation_topic: impl Into<String>,
    ) -> Self {
        Self {
            log,
            store,
            directory,
            invitation_topic: invitation_topic.into(),
        }
    }

    pub async fn on_invitation(&self, invitation: Invitation) -> Result<DispatchOutcome> {
        let mut workflows = self.store.lock().await;

        if let Some(target) = &invitation.target {
            if workflows.contains(&invitation.id) {
                debug!(invitation_id = %invitation.id, guest_id = %target.id, "Ignoring own addressed copy");
                metrics::record_duplicate_ignored("echo");
                return Ok(DispatchOutcome::OwnEcho);
            }
            warn!(
                invitation_id = %invitation.id,
                guest_id = %target.id,
                "Addressed invitation for unknown workflow, dropping"
            );
            metrics::record_unknown_workflow_dropped("invitation");
            return Ok(DispatchOutcome::UnknownWorkflow);
        }

        if let Some(state) = workflows.get_mut(&invitation.id) {
            if state.unsent.is_empty() {
                debug!(invitation_id = %invitation.id, "Invitation already dispatched, ignoring redelivery");
                metrics::record_duplicate_ignored("invitation");
                return Ok(DispatchOutcome::Duplicate);
            }

            info!(
                invitation_id = %invitation.id,
                remaining = state.unsent.len(),
                "Resuming interrupted dispatch"
            );
            let recipients = self.publish_unsent(state).await?;
            metrics::record_invitation_dispatched();
            return Ok(DispatchOutcome::Resumed { recipients });
        }

        let recipients = match self.directory.recipients(&invitation).await {
            Ok(recipients) => recipients,
            Err(e) => {
                warn!(invitation_id = %invitation.id, error = %e, "Recipient lookup failed, dispatching to nobody");
                Vec::new()
            }
        };
        let expected = recipients.len();

        workflows.register(WorkflowState::for_recipients(invitation.clone(), recipients));
        metrics::set_active_workflows(workflows.len());

        if expected == 0 {
            warn!(
                invitation_id = %invitation.id,
                event = %invitation.event.name,
                "No recipients for invitation; workflow will not complete"
            );
            return Ok(DispatchOutcome::EmptyRecipientSet);
        }

        if let Some(state) = workflows.get_mut(&invitation.id) {
            self.publish_unsent(state).await?;
        }

        metrics::record_invitation_dispatched();
        info!(
            invitation_id = %invitation.id,
            host_id = %invitation.host_id,
            event = %invitation.event.name,
            recipients = expected,
            "Invitation dispatched"
        );

        Ok(DispatchOutcome::Dispatched { recipients: expected })
    }

    /// Publish the addressed copies still owed for `state`, front to back.
    ///
    /// A failed publish leaves that recipient and everyone after it queued;
    /// the workflow stays registered so responses to the copies already out
    /// are still counted, and the redelivered original finishes the job.
    async fn publish_unsent(&self, state: &mut WorkflowState) -> Result<usize> {
        let mut published = 0;

        while let Some(recipient) = state.unsent.front() {
            let copy = state.invitation.addressed_to(recipient);
            if let Err(e) = publish_record(self.log.as_ref(), &self.invitation_topic, &copy).await {
                error!(
                    invitation_id = %state.invitation.id,
                    guest_id = %recipient.id,
                    remaining = state.unsent.len(),
                    error = %e,
                    "Failed to publish addressed invitation, remaining copies wait for redelivery"
                );
                return Err(e.into());
            }

            metrics::record_addressed_copy_published();
            debug!(invitation_id = %state.invitation.id, guest_id = %recipient.id, "Sent addressed invitation");
            state.unsent.pop_front();
            published += 1;
        }

        Ok(published)
    }
}

#[async_trait]
impl RecordHandler for Dispatcher {
    type Record = Invitation;

    async fn handle(&self, invitation: Invitation) -> Result<()> {
        self.on_invitation(invitation).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DirectoryError, StaticDirectory};
    use cv_common::{EventDetails, FieldMap, Recipient, WireRecord};
    use cv_log::{LogEntry, LogError, MemoryLog};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const TOPIC: &str = "event_invitations";

    fn invitation(id: &str) -> Invitation {
        let mut invitation = Invitation::new(
            "host-1",
            "Sarah Johnson",
            EventDetails {
                name: "Team Building Workshop".to_string(),
                date: "2025-02-15".to_string(),
                time: "14:00".to_string(),
                location: "Conference Room A".to_string(),
                description: "Fun activities".to_string(),
            },
        );
        invitation.id = id.to_string();
        invitation
    }

    fn guests(n: usize) -> Vec<Recipient> {
        (1..=n)
            .map(|i| Recipient::new(format!("guest_{}", i), format!("Guest {}", i)))
            .collect()
    }

    fn setup(recipients: Vec<Recipient>) -> (Arc<MemoryLog>, Arc<WorkflowStore>, Dispatcher) {
        let log = Arc::new(MemoryLog::default());
        let store = Arc::new(WorkflowStore::new());
        let dispatcher = Dispatcher::new(
            log.clone(),
            store.clone(),
            Arc::new(StaticDirectory::new(recipients)),
            TOPIC,
        );
        (log, store, dispatcher)
    }

    struct BrokenDirectory;

    #[async_trait]
    impl RecipientDirectory for BrokenDirectory {
        async fn recipients(&self, _: &Invitation) -> std::result::Result<Vec<Recipient>, DirectoryError> {
            Err(DirectoryError::Unavailable("lookup timed out".to_string()))
        }
    }

    #[tokio::test]
    async fn test_publishes_one_copy_per_recipient_in_directory_order() {
        let (log, store, dispatcher) = setup(guests(3));

        let outcome = dispatcher.on_invitation(invitation("inv-1")).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Dispatched { recipients: 3 });
        assert_eq!(store.expected_for("inv-1").await, Some(3));

        let copies: Vec<Invitation> = log
            .entries(TOPIC)
            .into_iter()
            .map(|e| Invitation::from_fields(e.fields).unwrap())
            .collect();
        let targets: Vec<&str> = copies
            .iter()
            .map(|c| c.target.as_ref().unwrap().id.as_str())
            .collect();
        assert_eq!(targets, vec!["guest_1", "guest_2", "guest_3"]);
        assert!(copies.iter().all(|c| c.id == "inv-1"));
    }

    #[tokio::test]
    async fn test_same_invitation_twice_dispatches_once() {
        let (log, _store, dispatcher) = setup(guests(5));

        dispatcher.on_invitation(invitation("inv-1")).await.unwrap();
        let second = dispatcher.on_invitation(invitation("inv-1")).await.unwrap();

        assert_eq!(second, DispatchOutcome::Duplicate);
        assert_eq!(log.entries(TOPIC).len(), 5);
    }

    #[tokio::test]
    async fn test_own_echo_is_ignored() {
        let (log, _store, dispatcher) = setup(guests(2));
        let original = invitation("inv-1");
        dispatcher.on_invitation(original.clone()).await.unwrap();

        let echo = original.addressed_to(&Recipient::new("guest_1", "Guest 1"));
        assert_eq!(dispatcher.on_invitation(echo).await.unwrap(), DispatchOutcome::OwnEcho);
        assert_eq!(log.entries(TOPIC).len(), 2);
    }

    #[tokio::test]
    async fn test_addressed_copy_for_unknown_workflow_is_dropped() {
        let (log, store, dispatcher) = setup(guests(2));
        let stray = invitation("inv-9").addressed_to(&Recipient::new("guest_1", "Guest 1"));

        assert_eq!(
            dispatcher.on_invitation(stray).await.unwrap(),
            DispatchOutcome::UnknownWorkflow
        );
        assert!(!store.contains("inv-9").await);
        assert!(log.entries(TOPIC).is_empty());
    }

    #[tokio::test]
    async fn test_empty_directory_registers_zero_expected() {
        let (log, store, dispatcher) = setup(Vec::new());

        let outcome = dispatcher.on_invitation(invitation("inv-1")).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::EmptyRecipientSet);
        assert_eq!(store.expected_for("inv-1").await, Some(0));
        assert!(log.entries(TOPIC).is_empty());
    }

    #[tokio::test]
    async fn test_failing_directory_registers_zero_expected() {
        let log = Arc::new(MemoryLog::default());
        let store = Arc::new(WorkflowStore::new());
        let dispatcher = Dispatcher::new(log.clone(), store.clone(), Arc::new(BrokenDirectory), TOPIC);

        let outcome = dispatcher.on_invitation(invitation("inv-1")).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::EmptyRecipientSet);
        assert_eq!(store.expected_for("inv-1").await, Some(0));
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_workflow_with_copies_queued() {
        let (log, store, dispatcher) = setup(guests(2));
        log.stop();

        assert!(dispatcher.on_invitation(invitation("inv-1")).await.is_err());
        assert_eq!(store.expected_for("inv-1").await, Some(2));

        let mut workflows = store.lock().await;
        let state = workflows.get_mut("inv-1").unwrap();
        assert_eq!(state.unsent.len(), 2);
    }

    /// MemoryLog whose `fail_on`-th publish (counting from one) fails.
    struct FlakyLog {
        inner: MemoryLog,
        publishes: AtomicUsize,
        fail_on: usize,
    }

    #[async_trait]
    impl MessageLog for FlakyLog {
        fn backend(&self) -> &str {
            "flaky"
        }

        async fn ping(&self) -> cv_log::Result<()> {
            self.inner.ping().await
        }

        async fn publish(&self, topic: &str, fields: FieldMap) -> cv_log::Result<String> {
            if self.publishes.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
                return Err(LogError::Connection("connection reset".to_string()));
            }
            self.inner.publish(topic, fields).await
        }

        async fn ensure_group(&self, topic: &str, group: &str) -> cv_log::Result<()> {
            self.inner.ensure_group(topic, group).await
        }

        async fn consume(
            &self,
            topic: &str,
            group: &str,
            consumer: &str,
            max_count: usize,
            block: Duration,
        ) -> cv_log::Result<Vec<LogEntry>> {
            self.inner.consume(topic, group, consumer, max_count, block).await
        }

        async fn acknowledge(&self, topic: &str, group: &str, message_id: &str) -> cv_log::Result<()> {
            self.inner.acknowledge(topic, group, message_id).await
        }
    }

    #[tokio::test]
    async fn test_redelivery_after_partial_dispatch_sends_only_missing_copies() {
        let log = Arc::new(FlakyLog {
            inner: MemoryLog::default(),
            publishes: AtomicUsize::new(0),
            fail_on: 2,
        });
        let store = Arc::new(WorkflowStore::new());
        let dispatcher = Dispatcher::new(
            log.clone(),
            store.clone(),
            Arc::new(StaticDirectory::new(guests(3))),
            TOPIC,
        );
        let targets = |log: &FlakyLog| -> Vec<String> {
            log.inner
                .entries(TOPIC)
                .into_iter()
                .map(|e| Invitation::from_fields(e.fields).unwrap().target.unwrap().id)
                .collect()
        };

        assert!(dispatcher.on_invitation(invitation("inv-1")).await.is_err());
        assert_eq!(targets(&log), vec!["guest_1"]);
        assert!(store.contains("inv-1").await);

        let resumed = dispatcher.on_invitation(invitation("inv-1")).await.unwrap();
        assert_eq!(resumed, DispatchOutcome::Resumed { recipients: 2 });
        assert_eq!(targets(&log), vec!["guest_1", "guest_2", "guest_3"]);
        assert_eq!(store.expected_for("inv-1").await, Some(3));

        let again = dispatcher.on_invitation(invitation("inv-1")).await.unwrap();
        assert_eq!(again, DispatchOutcome::Duplicate);
        assert_eq!(log.inner.entries(TOPIC).len(), 3);
    }
}
