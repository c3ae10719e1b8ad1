//! Config file discovery and environment overrides

use crate::{AppConfig, ConfigError, RecipientConfig};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Searched in order when no explicit path is given
const CONFIG_PATHS: &[&str] = &[
    "convene.toml",
    "config.toml",
    "./config/convene.toml",
    "/etc/convene/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Loader using `CONVENE_CONFIG` and the standard search paths
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Loader that tries `path` first
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides,
    /// then validate it.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    /// First existing file among the explicit path, `CONVENE_CONFIG` and `CONFIG_PATHS`
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("CONVENE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    /// `CONVENE_*` variables win over file values
    fn apply_env_overrides(&self, config: &mut AppConfig) {
        // HTTP
        if let Ok(val) = env::var("CONVENE_HTTP_PORT") {
            if let Ok(port) = val.parse() {
                config.http.port = port;
            }
        }
        if let Ok(val) = env::var("CONVENE_HTTP_HOST") {
            config.http.host = val;
        }

        // Redis (REDIS_HOST/PORT/DB kept for existing deployments)
        if let Ok(val) = env::var("CONVENE_REDIS_URL") {
            config.redis.url = val;
        } else if let Ok(host) = env::var("REDIS_HOST") {
            let port = env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
            let db = env::var("REDIS_DB").unwrap_or_else(|_| "0".to_string());
            config.redis.url = format!("redis://{}:{}/{}", host, port, db);
        }

        // Log backend
        if let Ok(val) = env::var("CONVENE_LOG_BACKEND") {
            config.log.backend = val;
        }
        if let Ok(val) = env::var("CONVENE_CLAIM_IDLE_MS") {
            if let Ok(ms) = val.parse() {
                config.log.claim_idle_ms = ms;
            }
        }

        // Topics
        if let Ok(val) = env::var("CONVENE_INVITATION_TOPIC") {
            config.topics.invitations = val;
        }
        if let Ok(val) = env::var("CONVENE_RESPONSE_TOPIC") {
            config.topics.responses = val;
        }
        if let Ok(val) = env::var("CONVENE_SUMMARY_TOPIC") {
            config.topics.summaries = val;
        }
        if let Ok(val) = env::var("CONVENE_COORDINATOR_GROUP") {
            config.topics.coordinator_group = val;
        }

        // Coordinator
        if let Ok(val) = env::var("CONVENE_MAX_COUNT") {
            if let Ok(count) = val.parse() {
                config.coordinator.max_count = count;
            }
        }
        if let Ok(val) = env::var("CONVENE_BLOCK_MS") {
            if let Ok(ms) = val.parse() {
                config.coordinator.block_ms = ms;
            }
        }
        if let Ok(val) = env::var("CONVENE_ERROR_BACKOFF_MS") {
            if let Ok(ms) = val.parse() {
                config.coordinator.error_backoff_ms = ms;
            }
        }

        // Directory: "guest_1=Alice Chen,guest_2=Bob Rodriguez"
        if let Ok(val) = env::var("CONVENE_RECIPIENTS") {
            config.directory.recipients = parse_recipients(&val);
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a comma-separated `id=name` list. An entry without `=` uses the id as name.
pub(crate) fn parse_recipients(raw: &str) -> Vec<RecipientConfig> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((id, name)) => RecipientConfig {
                id: id.trim().to_string(),
                name: name.trim().to_string(),
            },
            None => RecipientConfig {
                id: entry.to_string(),
                name: entry.to_string(),
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_recipients() {
        let recipients = parse_recipients("guest_1=Alice Chen, guest_2 = Bob ,guest_3,,");
        assert_eq!(recipients.len(), 3);
        assert_eq!(recipients[0].name, "Alice Chen");
        assert_eq!(recipients[1].id, "guest_2");
        assert_eq!(recipients[1].name, "Bob");
        assert_eq!(recipients[2].name, "guest_3");
    }

    #[test]
    fn test_load_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[log]\nbackend = \"memory\"\n\n[coordinator]\nblock_ms = 250").unwrap();

        let config = ConfigLoader::with_path(file.path()).load().unwrap();
        assert_eq!(config.coordinator.block_ms, 250);
        assert_eq!(config.topics.responses, "guest_responses");
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[log]\nbackend = \"carrier-pigeon\"").unwrap();

        let result = ConfigLoader::with_path(file.path()).load();
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }
}
