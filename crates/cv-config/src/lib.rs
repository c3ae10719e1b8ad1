//! Convene Configuration System
//!
//! One TOML file, every key optional, with `CONVENE_*` environment overrides
//! applied on top by [`ConfigLoader`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Why a configuration could not be produced
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Everything the coordinator process and the participants read at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub redis: RedisConfig,
    pub log: LogConfig,
    pub topics: TopicsConfig,
    pub coordinator: CoordinatorConfig,
    pub directory: DirectoryConfig,
}

/// Health and metrics endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    pub host: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 9090,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
        }
    }
}

/// Message log backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Backend type: redis or memory
    pub backend: String,
    /// Unacknowledged entries idle for this long are redelivered
    pub claim_idle_ms: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            backend: "redis".to_string(),
            claim_idle_ms: 30_000,
        }
    }
}

/// Topic and consumer group names
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicsConfig {
    pub invitations: String,
    pub responses: String,
    pub summaries: String,
    pub coordinator_group: String,
    pub guest_group: String,
    pub host_group: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            invitations: "event_invitations".to_string(),
            responses: "guest_responses".to_string(),
            summaries: "event_summaries".to_string(),
            coordinator_group: "coordinators".to_string(),
            guest_group: "guests".to_string(),
            host_group: "hosts".to_string(),
        }
    }
}

/// Coordinator consumption loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub invitation_consumer: String,
    pub response_consumer: String,
    /// Maximum entries taken per poll
    pub max_count: usize,
    /// Bounded wait of one blocking poll
    pub block_ms: u64,
    /// Pause after a failed poll or a failed message
    pub error_backoff_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            invitation_consumer: "coordinator_main".to_string(),
            response_consumer: "coordinator_responses".to_string(),
            max_count: 1,
            block_ms: 1000,
            error_backoff_ms: 1000,
        }
    }
}

/// Static recipient directory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub recipients: Vec<RecipientConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientConfig {
    pub id: String,
    pub name: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        let guests = [
            ("guest_1", "Alice Chen"),
            ("guest_2", "Bob Rodriguez"),
            ("guest_3", "Carol Williams"),
            ("guest_4", "David Kim"),
            ("guest_5", "Emma Thompson"),
        ];
        Self {
            recipients: guests
                .iter()
                .map(|(id, name)| RecipientConfig {
                    id: id.to_string(),
                    name: name.to_string(),
                })
                .collect(),
        }
    }
}

impl AppConfig {
    /// Parse one TOML file without environment overrides or validation
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Standard search paths plus environment overrides, validated
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Check values the loops and backends cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.log.backend.as_str() {
            "redis" | "memory" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "log.backend must be 'redis' or 'memory', got '{}'",
                    other
                )))
            }
        }

        let names = [
            ("topics.invitations", &self.topics.invitations),
            ("topics.responses", &self.topics.responses),
            ("topics.summaries", &self.topics.summaries),
            ("topics.coordinator_group", &self.topics.coordinator_group),
            ("topics.guest_group", &self.topics.guest_group),
            ("topics.host_group", &self.topics.host_group),
            ("coordinator.invitation_consumer", &self.coordinator.invitation_consumer),
            ("coordinator.response_consumer", &self.coordinator.response_consumer),
        ];
        for (key, value) in names {
            if value.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!("{} must not be empty", key)));
            }
        }

        if self.coordinator.max_count == 0 {
            return Err(ConfigError::ValidationError(
                "coordinator.max_count must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for recipient in &self.directory.recipients {
            if !seen.insert(recipient.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate recipient id '{}' in directory",
                    recipient.id
                )));
            }
        }

        Ok(())
    }

    /// Documented config file with every default spelled out
    pub fn example_toml() -> String {
        r#"# Convene Configuration
# Environment variables (CONVENE_*) override these settings

[http]
port = 9090
host = "0.0.0.0"

[redis]
url = "redis://localhost:6379/0"

[log]
backend = "redis"  # redis or memory
claim_idle_ms = 30000

[topics]
invitations = "event_invitations"
responses = "guest_responses"
summaries = "event_summaries"
coordinator_group = "coordinators"
guest_group = "guests"
host_group = "hosts"

[coordinator]
invitation_consumer = "coordinator_main"
response_consumer = "coordinator_responses"
max_count = 1
block_ms = 1000
error_backoff_ms = 1000

[[directory.recipients]]
id = "guest_1"
name = "Alice Chen"

[[directory.recipients]]
id = "guest_2"
name = "Bob Rodriguez"
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.topics.invitations, "event_invitations");
        assert_eq!(config.directory.recipients.len(), 5);
        assert_eq!(config.coordinator.block_ms, 1000);
    }

    #[test]
    fn test_example_toml_parses() {
        let config: AppConfig = toml::from_str(&AppConfig::example_toml()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.directory.recipients.len(), 2);
        assert_eq!(config.log.claim_idle_ms, 30000);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AppConfig = toml::from_str("[coordinator]\nmax_count = 10\n").unwrap();
        assert_eq!(config.coordinator.max_count, 10);
        assert_eq!(config.coordinator.block_ms, 1000);
        assert_eq!(config.topics.summaries, "event_summaries");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.log.backend = "kafka".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.topics.responses = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.coordinator.max_count = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.directory.recipients.push(RecipientConfig {
            id: "guest_1".to_string(),
            name: "Alice again".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_directory_is_allowed() {
        let mut config = AppConfig::default();
        config.directory.recipients.clear();
        config.validate().unwrap();
    }
}
