//! Response fan-in
//!
//! Records each distinct response against its workflow and publishes the
//! summary once every expected guest has answered.

use std::sync::Arc;

use async_trait::async_trait;
use cv_common::{Response, Summary};
use cv_log::{publish_record, MessageLog};
use tracing::{debug, error, info, warn};

use crate::consumer::RecordHandler;
use crate::error::Result;
use crate::metrics;
use crate::store::WorkflowStore;

/// What handling one inbound response did.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    /// Stored; the workflow is still waiting
    Recorded { received: usize, expected: usize },
    /// This response completed the workflow and the summary was published
    Completed(Summary),
    /// Response id already recorded for the workflow
    Duplicate,
    /// No such workflow (never dispatched, or already completed)
    UnknownWorkflow,
}

pub struct Aggregator {
    log: Arc<dyn MessageLog>,
    store: Arc<WorkflowStore>,
    summary_topic: String,
}

impl Aggregator {
    pub fn new(log: Arc<dyn MessageLog>, store: Arc<WorkflowStore>, summary_topic: impl Into<String>) -> Self {
        Self {
            log,
            store,
            summary_topic: summary_topic.into(),
        }
    }

    pub async fn on_response(&self, response: Response) -> Result<ResponseOutcome> {
        let mut workflows = self.store.lock().await;
        let invitation_id = response.invitation_id.clone();

        let Some(state) = workflows.get_mut(&invitation_id) else {
            warn!(
                invitation_id = %invitation_id,
                response_id = %response.id,
                guest_id = %response.guest_id,
                "Response for unknown workflow, dropping"
            );
            metrics::record_unknown_workflow_dropped("response");
            return Ok(ResponseOutcome::UnknownWorkflow);
        };

        let duplicate = state.has_response(&response.id);
        if duplicate {
            debug!(invitation_id = %invitation_id, response_id = %response.id, "Response already recorded");
            metrics::record_duplicate_ignored("response");
        } else {
            info!(
                invitation_id = %invitation_id,
                guest_id = %response.guest_id,
                decision = %response.decision,
                received = state.responses.len() + 1,
                expected = state.expected,
                "Response recorded"
            );
            state.responses.push(response);
            metrics::record_response_recorded();
        }

        // Runs for duplicates as well so a failed summary publish is retried
        // on redelivery.
        if !state.is_complete() {
            return Ok(if duplicate {
                ResponseOutcome::Duplicate
            } else {
                ResponseOutcome::Recorded {
                    received: state.responses.len(),
                    expected: state.expected,
                }
            });
        }

        let summary = Summary::for_workflow(&state.invitation, state.expected, state.responses.clone());

        if let Err(e) = publish_record(self.log.as_ref(), &self.summary_topic, &summary).await {
            error!(invitation_id = %invitation_id, error = %e, "Failed to publish summary, keeping workflow");
            return Err(e.into());
        }

        workflows.remove(&invitation_id);
        metrics::record_summary_published();
        metrics::set_active_workflows(workflows.len());

        info!(
            invitation_id = %invitation_id,
            host_id = %summary.host_id,
            yes = summary.yes_count,
            no = summary.no_count,
            maybe = summary.maybe_count,
            "Workflow complete, summary published"
        );

        Ok(ResponseOutcome::Completed(summary))
    }
}

#[async_trait]
impl RecordHandler for Aggregator {
    type Record = Response;

    async fn handle(&self, response: Response) -> Result<()> {
        self.on_response(response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::WorkflowState;
    use cv_common::{Decision, EventDetails, Invitation, Recipient, WireRecord};
    use cv_log::MemoryLog;

    const TOPIC: &str = "event_summaries";

    fn invitation(id: &str) -> Invitation {
        let mut invitation = Invitation::new(
            "host-1",
            "Sarah Johnson",
            EventDetails {
                name: "Team Building Workshop".to_string(),
                date: "2025-02-15".to_string(),
                time: "14:00".to_string(),
                location: "Conference Room A".to_string(),
                description: String::new(),
            },
        );
        invitation.id = id.to_string();
        invitation
    }

    fn guest(n: usize) -> Recipient {
        Recipient::new(format!("guest_{}", n), format!("Guest {}", n))
    }

    async fn setup(expected: usize) -> (Arc<MemoryLog>, Arc<WorkflowStore>, Aggregator) {
        let log = Arc::new(MemoryLog::default());
        let store = Arc::new(WorkflowStore::new());
        store
            .lock()
            .await
            .register(WorkflowState::new(invitation("inv-1"), expected));
        let aggregator = Aggregator::new(log.clone(), store.clone(), TOPIC);
        (log, store, aggregator)
    }

    #[tokio::test]
    async fn test_summary_after_last_expected_response_only() {
        let (log, store, aggregator) = setup(5).await;
        let decisions = [Decision::Yes, Decision::No, Decision::Maybe, Decision::Yes, Decision::Yes];

        for (i, decision) in decisions.iter().enumerate().take(4) {
            let outcome = aggregator
                .on_response(Response::new("inv-1", &guest(i + 1), *decision, None))
                .await
                .unwrap();
            assert_eq!(outcome, ResponseOutcome::Recorded { received: i + 1, expected: 5 });
            assert!(log.entries(TOPIC).is_empty());
        }

        let outcome = aggregator
            .on_response(Response::new("inv-1", &guest(5), decisions[4], None))
            .await
            .unwrap();
        let ResponseOutcome::Completed(summary) = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(summary.total_invited, 5);
        assert_eq!(summary.total_responses, 5);
        assert_eq!((summary.yes_count, summary.no_count, summary.maybe_count), (3, 1, 1));
        assert_eq!(log.entries(TOPIC).len(), 1);
        assert!(!store.contains("inv-1").await);

        // A sixth response arrives after cleanup
        let late = aggregator
            .on_response(Response::new("inv-1", &guest(6), Decision::No, None))
            .await
            .unwrap();
        assert_eq!(late, ResponseOutcome::UnknownWorkflow);
        assert_eq!(log.entries(TOPIC).len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_response_counts_once() {
        let (_log, store, aggregator) = setup(3).await;
        let response = Response::new("inv-1", &guest(1), Decision::Yes, Some("Count me in".to_string()));

        aggregator.on_response(response.clone()).await.unwrap();
        let again = aggregator.on_response(response).await.unwrap();

        assert_eq!(again, ResponseOutcome::Duplicate);
        assert_eq!(store.response_count("inv-1").await, Some(1));
    }

    #[tokio::test]
    async fn test_unknown_workflow_is_dropped() {
        let (log, _store, aggregator) = setup(1).await;
        let outcome = aggregator
            .on_response(Response::new("inv-unknown", &guest(1), Decision::Yes, None))
            .await
            .unwrap();

        assert_eq!(outcome, ResponseOutcome::UnknownWorkflow);
        assert!(log.entries(TOPIC).is_empty());
    }

    #[tokio::test]
    async fn test_zero_expected_never_completes() {
        let (log, store, aggregator) = setup(0).await;
        let outcome = aggregator
            .on_response(Response::new("inv-1", &guest(1), Decision::Yes, None))
            .await
            .unwrap();

        assert_eq!(outcome, ResponseOutcome::Recorded { received: 1, expected: 0 });
        assert!(log.entries(TOPIC).is_empty());
        assert!(store.contains("inv-1").await);
    }

    #[tokio::test]
    async fn test_published_summary_decodes_with_ordered_responses() {
        let (log, _store, aggregator) = setup(2).await;
        let first = Response::new("inv-1", &guest(2), Decision::Maybe, Some("Depends".to_string()));
        let second = Response::new("inv-1", &guest(1), Decision::No, None);

        aggregator.on_response(first.clone()).await.unwrap();
        aggregator.on_response(second.clone()).await.unwrap();

        let entry = log.entries(TOPIC).remove(0);
        let summary = Summary::from_fields(entry.fields).unwrap();
        assert_eq!(summary.invitation_id, "inv-1");
        assert_eq!(summary.host_id, "host-1");
        assert_eq!(summary.responses, vec![first, second]);
    }

    #[tokio::test]
    async fn test_failed_summary_publish_keeps_state_and_retries_on_duplicate() {
        let log = Arc::new(MemoryLog::default());
        let store = Arc::new(WorkflowStore::new());
        store
            .lock()
            .await
            .register(WorkflowState::new(invitation("inv-1"), 1));

        let broken = Arc::new(MemoryLog::default());
        broken.stop();
        let failing = Aggregator::new(broken, store.clone(), TOPIC);
        let response = Response::new("inv-1", &guest(1), Decision::Yes, None);

        assert!(failing.on_response(response.clone()).await.is_err());
        assert_eq!(store.response_count("inv-1").await, Some(1));

        // Redelivered after the broker recovers
        let healthy = Aggregator::new(log.clone(), store.clone(), TOPIC);
        let outcome = healthy.on_response(response).await.unwrap();
        assert!(matches!(outcome, ResponseOutcome::Completed(ref s) if s.total_responses == 1));
        assert_eq!(log.entries(TOPIC).len(), 1);
        assert!(!store.contains("inv-1").await);
    }
}
