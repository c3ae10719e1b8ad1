//! Invitation recipient

use std::collections::HashSet;
use std::sync::Arc;

use cv_common::{Decision, Invitation, Recipient, Response, WireRecord};
use cv_log::{publish_record, MessageLog, Result};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::{participant_group, ParticipantSettings};

/// A guest's answer to one invitation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub decision: Decision,
    pub message: Option<String>,
}

/// Decides how a guest answers.
pub trait ResponsePolicy: Send + Sync {
    fn reply(&self, invitation: &Invitation) -> Reply;
}

/// Gives the same answer to every invitation.
#[derive(Debug, Clone)]
pub struct FixedPolicy {
    reply: Reply,
}

impl FixedPolicy {
    pub fn new(decision: Decision, message: Option<String>) -> Self {
        Self {
            reply: Reply { decision, message },
        }
    }
}

impl ResponsePolicy for FixedPolicy {
    fn reply(&self, _invitation: &Invitation) -> Reply {
        self.reply.clone()
    }
}

pub struct Guest {
    log: Arc<dyn MessageLog>,
    identity: Recipient,
    policy: Arc<dyn ResponsePolicy>,
    group: String,
    settings: ParticipantSettings,
    /// Invitation ids already answered
    answered: Mutex<HashSet<String>>,
}

impl Guest {
    pub fn new(
        log: Arc<dyn MessageLog>,
        identity: Recipient,
        policy: Arc<dyn ResponsePolicy>,
        settings: ParticipantSettings,
    ) -> Self {
        Self {
            log,
            group: participant_group(&settings.guest_group, &identity.id),
            identity,
            policy,
            settings,
            answered: Mutex::new(HashSet::new()),
        }
    }

    pub fn identity(&self) -> &Recipient {
        &self.identity
    }

    /// Create this guest's invitation group.
    pub async fn initialize(&self) -> Result<()> {
        self.log
            .ensure_group(&self.settings.invitation_topic, &self.group)
            .await
    }

    pub fn has_answered(&self, invitation_id: &str) -> bool {
        self.answered.lock().contains(invitation_id)
    }

    /// Answer `invitation` if it is a copy addressed to this guest that has
    /// not been answered yet.
    pub async fn handle_invitation(&self, invitation: &Invitation) -> Result<Option<Response>> {
        if !invitation.is_addressed_to(&self.identity.id) {
            return Ok(None);
        }
        if self.has_answered(&invitation.id) {
            debug!(invitation_id = %invitation.id, guest_id = %self.identity.id, "Already answered");
            return Ok(None);
        }

        let reply = self.policy.reply(invitation);
        let response = Response::new(&invitation.id, &self.identity, reply.decision, reply.message);
        publish_record(self.log.as_ref(), &self.settings.response_topic, &response).await?;
        self.answered.lock().insert(invitation.id.clone());

        info!(
            invitation_id = %invitation.id,
            guest_id = %self.identity.id,
            event = %invitation.event.name,
            decision = %response.decision,
            "Response sent"
        );
        Ok(Some(response))
    }

    /// One poll of the invitation topic. Every entry is acknowledged once
    /// handled, whether or not it was meant for this guest.
    pub async fn poll_once(&self) -> Result<Vec<Response>> {
        let s = &self.settings;
        let entries = self
            .log
            .consume(&s.invitation_topic, &self.group, &self.identity.id, s.max_count, s.block)
            .await?;

        let mut sent = Vec::new();
        for entry in entries {
            match Invitation::from_fields(entry.fields) {
                Ok(invitation) => {
                    if let Some(response) = self.handle_invitation(&invitation).await? {
                        sent.push(response);
                    }
                }
                Err(e) => {
                    error!(message_id = %entry.message_id, error = %e, "Undecodable invitation, skipping");
                }
            }
            self.log
                .acknowledge(&s.invitation_topic, &self.group, &entry.message_id)
                .await?;
        }
        Ok(sent)
    }

    /// Answer invitations until `shutdown` turns true or its sender is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(guest_id = %self.identity.id, name = %self.identity.name, "Guest listening for invitations");

        while !*shutdown.borrow() {
            if let Err(e) = self.poll_once().await {
                error!(guest_id = %self.identity.id, error = %e, "Invitation poll failed");
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.error_backoff) => {}
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

        info!(guest_id = %self.identity.id, "Guest stopped");
    }
}
