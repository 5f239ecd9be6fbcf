/// Configuration for the wiki core services
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Default capacity of the domain event broadcast channel
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 128;

/// Runtime configuration for `DatabaseService` and `WikiService`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikiConfig {
    /// Path to the database file
    pub database_path: PathBuf,

    /// How long a connection waits on a locked database, in milliseconds
    pub busy_timeout_ms: u64,

    /// Buffered events per subscriber before lagging subscribers drop events
    pub event_channel_capacity: usize,

    /// Title given to Draft batches opened implicitly by a staged write
    pub default_batch_title: String,
}

impl Default for WikiConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./data/wikiflow.db"),
            busy_timeout_ms: 5000,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            default_batch_title: "Untitled change request".to_string(),
        }
    }
}

impl WikiConfig {
    /// Defaults overlaid with `WIKIFLOW_DB_PATH`, `WIKIFLOW_BUSY_TIMEOUT_MS`
    /// and `WIKIFLOW_EVENT_CAPACITY`. Unparseable values fall back silently.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_path: env::var("WIKIFLOW_DB_PATH")
                .ok()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            busy_timeout_ms: env::var("WIKIFLOW_BUSY_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.busy_timeout_ms),
            event_channel_capacity: env::var("WIKIFLOW_EVENT_CAPACITY")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(defaults.event_channel_capacity),
            default_batch_title: defaults.default_batch_title,
        }
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.database_path.as_os_str().is_empty() {
            return Err("database_path cannot be empty".to_string());
        }
        if self.busy_timeout_ms == 0 {
            return Err("busy_timeout_ms must be greater than 0".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err("event_channel_capacity must be greater than 0".to_string());
        }
        if self.default_batch_title.trim().is_empty() {
            return Err("default_batch_title cannot be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = WikiConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.busy_timeout_ms, 5000);
        assert_eq!(config.event_channel_capacity, DEFAULT_EVENT_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_invalid_config() {
        let config = WikiConfig {
            busy_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = WikiConfig::default().with_database_path("");
        assert_eq!(
            config.validate(),
            Err("database_path cannot be empty".to_string())
        );
    }

    #[test]
    fn test_config_serialization() {
        let config = WikiConfig::default().with_database_path("/tmp/wiki.db");
        let json = serde_json::to_string(&config).unwrap();
        let parsed: WikiConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
