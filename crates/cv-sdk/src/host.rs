//! Invitation producer

use std::sync::Arc;
use std::time::Duration;

use cv_common::{EventDetails, Invitation, Summary, WireRecord};
use cv_log::{publish_record, MessageLog, Result};
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::{participant_group, ParticipantSettings};

pub struct Host {
    log: Arc<dyn MessageLog>,
    id: String,
    name: String,
    group: String,
    settings: ParticipantSettings,
}

impl Host {
    pub fn new(
        log: Arc<dyn MessageLog>,
        id: impl Into<String>,
        name: impl Into<String>,
        settings: ParticipantSettings,
    ) -> Self {
        let id = id.into();
        Self {
            log,
            group: participant_group(&settings.host_group, &id),
            id,
            name: name.into(),
            settings,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create this host's summary group. Call before publishing so no
    /// summary is missed.
    pub async fn initialize(&self) -> Result<()> {
        self.log
            .ensure_group(&self.settings.summary_topic, &self.group)
            .await
    }

    pub fn create_invitation(&self, event: EventDetails) -> Invitation {
        Invitation::new(&self.id, &self.name, event)
    }

    pub async fn publish_invitation(&self, invitation: &Invitation) -> Result<String> {
        let message_id =
            publish_record(self.log.as_ref(), &self.settings.invitation_topic, invitation).await?;
        info!(
            invitation_id = %invitation.id,
            event = %invitation.event.name,
            message_id = %message_id,
            "Invitation published"
        );
        Ok(message_id)
    }

    /// One poll of the summary topic. Every entry is acknowledged; only
    /// summaries for this host are returned.
    pub async fn poll_summaries(&self) -> Result<Vec<Summary>> {
        let s = &self.settings;
        let entries = self
            .log
            .consume(&s.summary_topic, &self.group, &self.id, s.max_count, s.block)
            .await?;

        let mut summaries = Vec::new();
        for entry in entries {
            match Summary::from_fields(entry.fields) {
                Ok(summary) if summary.host_id == self.id => {
                    info!(
                        invitation_id = %summary.invitation_id,
                        yes = summary.yes_count,
                        no = summary.no_count,
                        maybe = summary.maybe_count,
                        response_rate = summary.response_rate(),
                        "Summary received"
                    );
                    summaries.push(summary);
                }
                Ok(summary) => {
                    debug!(invitation_id = %summary.invitation_id, host_id = %summary.host_id, "Summary for another host");
                }
                Err(e) => {
                    error!(message_id = %entry.message_id, error = %e, "Undecodable summary, skipping");
                }
            }
            self.log
                .acknowledge(&s.summary_topic, &self.group, &entry.message_id)
                .await?;
        }
        Ok(summaries)
    }

    /// Poll until the summary for `invitation_id` arrives or `timeout`
    /// passes. Summaries for other invitations of this host are dropped.
    pub async fn wait_for_summary(&self, invitation_id: &str, timeout: Duration) -> Result<Option<Summary>> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Some(summary) = self
                .poll_summaries()
                .await?
                .into_iter()
                .find(|s| s.invitation_id == invitation_id)
            {
                return Ok(Some(summary));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cv_common::{Decision, Recipient, Response};
    use cv_log::MemoryLog;

    fn settings() -> ParticipantSettings {
        ParticipantSettings {
            block: Duration::from_millis(20),
            max_count: 10,
            ..ParticipantSettings::default()
        }
    }

    fn event() -> EventDetails {
        EventDetails {
            name: "Team Building Workshop".to_string(),
            date: "2025-02-15".to_string(),
            time: "14:00".to_string(),
            location: "Conference Room A".to_string(),
            description: "Fun activities and networking".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_invitation() {
        let log = Arc::new(MemoryLog::default());
        let host = Host::new(log.clone(), "host-1", "Sarah Johnson", settings());

        let invitation = host.create_invitation(event());
        assert_eq!(invitation.host_id, "host-1");
        assert!(!invitation.is_addressed());

        host.publish_invitation(&invitation).await.unwrap();
        let entries = log.entries("event_invitations");
        assert_eq!(Invitation::from_fields(entries[0].fields.clone()).unwrap(), invitation);
    }

    #[tokio::test]
    async fn test_poll_summaries_filters_by_host_and_acks_everything() {
        let log = Arc::new(MemoryLog::default());
        let host = Host::new(log.clone(), "host-1", "Sarah", settings());
        host.initialize().await.unwrap();

        let guest = Recipient::new("guest_1", "Alice Chen");
        let mine = host.create_invitation(event());
        let theirs = Invitation::new("host-2", "Mike", event());
        for invitation in [&theirs, &mine] {
            let responses = vec![Response::new(&invitation.id, &guest, Decision::Yes, None)];
            let summary = Summary::for_workflow(invitation, 1, responses);
            publish_record(log.as_ref(), "event_summaries", &summary).await.unwrap();
        }

        let summaries = host.poll_summaries().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].invitation_id, mine.id);
        assert_eq!(log.outstanding("event_summaries", "hosts:host-1"), 0);
    }

    #[tokio::test]
    async fn test_wait_for_summary_times_out() {
        let log = Arc::new(MemoryLog::default());
        let host = Host::new(log, "host-1", "Sarah", settings());
        host.initialize().await.unwrap();

        let found = host
            .wait_for_summary("inv-1", Duration::from_millis(60))
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
