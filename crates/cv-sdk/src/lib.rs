//! Convene participants
//!
//! A [`Host`] publishes invitations and collects the summaries addressed to
//! it. A [`Guest`] answers the invitation copies addressed to it. Both talk
//! only to the message log.
//!
//! Every participant reads through its own consumer group
//! (`<base group>:<participant id>`), so each host and each guest sees the
//! complete topic and filters at the application layer.

use std::time::Duration;

use cv_config::AppConfig;

pub mod guest;
pub mod host;

pub use guest::{FixedPolicy, Guest, Reply, ResponsePolicy};
pub use host::Host;

/// Topics, base group names and polling settings shared by participants.
#[derive(Debug, Clone)]
pub struct ParticipantSettings {
    pub invitation_topic: String,
    pub response_topic: String,
    pub summary_topic: String,
    pub guest_group: String,
    pub host_group: String,
    pub max_count: usize,
    pub block: Duration,
    pub error_backoff: Duration,
}

impl ParticipantSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            invitation_topic: config.topics.invitations.clone(),
            response_topic: config.topics.responses.clone(),
            summary_topic: config.topics.summaries.clone(),
            guest_group: config.topics.guest_group.clone(),
            host_group: config.topics.host_group.clone(),
            max_count: config.coordinator.max_count,
            block: Duration::from_millis(config.coordinator.block_ms),
            error_backoff: Duration::from_millis(config.coordinator.error_backoff_ms),
        }
    }
}

impl Default for ParticipantSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Consumer group private to one participant.
pub fn participant_group(base: &str, participant_id: &str) -> String {
    format!("{}:{}", base, participant_id)
}
