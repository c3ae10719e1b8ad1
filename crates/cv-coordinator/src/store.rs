//! Per-workflow aggregation state
//!
//! One entry per invitation id, holding the invitation, the responses
//! received so far, the expected response count and the recipients whose
//! addressed copy has not been published yet. Entries are created
//! whole and removed whole. All access goes through [`WorkflowStore::lock`],
//! and the returned guard is held for the complete handling of one message.

use std::collections::{HashMap, VecDeque};

use cv_common::{Invitation, Recipient, Response};
use tokio::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
pub struct WorkflowState {
    pub invitation: Invitation,
    /// Distinct responses in arrival order
    pub responses: Vec<Response>,
    pub expected: usize,
    /// Recipients still waiting for their addressed copy, in directory order
    pub unsent: VecDeque<Recipient>,
}

impl WorkflowState {
    pub fn new(invitation: Invitation, expected: usize) -> Self {
        Self {
            invitation,
            responses: Vec::new(),
            expected,
            unsent: VecDeque::new(),
        }
    }

    /// Workflow expecting one response per recipient, none of them sent yet.
    pub fn for_recipients(invitation: Invitation, recipients: Vec<Recipient>) -> Self {
        Self {
            invitation,
            responses: Vec::new(),
            expected: recipients.len(),
            unsent: recipients.into(),
        }
    }

    pub fn has_response(&self, response_id: &str) -> bool {
        self.responses.iter().any(|r| r.id == response_id)
    }

    /// A workflow expecting nobody never completes.
    pub fn is_complete(&self) -> bool {
        self.expected > 0 && self.responses.len() >= self.expected
    }
}

/// Lock-guarded workflow table shared by the dispatcher and the aggregator.
#[derive(Debug, Default)]
pub struct WorkflowStore {
    workflows: Mutex<HashMap<String, WorkflowState>>,
}

impl WorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive access for one unit of work.
    pub async fn lock(&self) -> Workflows<'_> {
        Workflows {
            inner: self.workflows.lock().await,
        }
    }

    pub async fn active_count(&self) -> usize {
        self.workflows.lock().await.len()
    }

    pub async fn contains(&self, invitation_id: &str) -> bool {
        self.workflows.lock().await.contains_key(invitation_id)
    }

    pub async fn expected_for(&self, invitation_id: &str) -> Option<usize> {
        self.workflows.lock().await.get(invitation_id).map(|w| w.expected)
    }

    pub async fn response_count(&self, invitation_id: &str) -> Option<usize> {
        self.workflows
            .lock()
            .await
            .get(invitation_id)
            .map(|w| w.responses.len())
    }
}

/// Held view of the workflow table.
pub struct Workflows<'a> {
    inner: MutexGuard<'a, HashMap<String, WorkflowState>>,
}

impl Workflows<'_> {
    pub fn contains(&self, invitation_id: &str) -> bool {
        self.inner.contains_key(invitation_id)
    }

    pub fn get_mut(&mut self, invitation_id: &str) -> Option<&mut WorkflowState> {
        self.inner.get_mut(invitation_id)
    }

    /// Insert a new workflow keyed by its invitation id. Returns false and
    /// leaves the table untouched if the id is already present.
    pub fn register(&mut self, state: WorkflowState) -> bool {
        if self.inner.contains_key(&state.invitation.id) {
            return false;
        }
        self.inner.insert(state.invitation.id.clone(), state);
        true
    }

    pub fn remove(&mut self, invitation_id: &str) -> Option<WorkflowState> {
        self.inner.remove(invitation_id)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
