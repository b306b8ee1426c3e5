//! Configuration for the biosensor sync client.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the sync client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Push channel URL (ws:// or wss://)
    pub ws_url: String,

    /// Base URL of the REST API
    pub api_base_url: String,

    /// Resource queried under the base URL, e.g. `ouratimeseries`
    pub resource: String,

    /// Extra headers sent with every range query
    pub headers: BTreeMap<String, String>,

    /// Push message types that mean "the server has new data"
    pub update_tags: Vec<String>,

    /// Push message type used for liveness echoes
    pub liveness_tag: String,

    /// Live mode lookback, in hours
    pub lookback_hours: u32,

    /// Record limit assumed when the server does not advertise one
    pub default_record_limit: u64,

    /// Timeout for a single range query
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,

    /// Reconnect schedule for the push channel
    pub reconnect: ReconnectPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(
            "ngrok-skip-browser-warning".to_string(),
            "true".to_string(),
        );

        Self {
            ws_url: "ws://127.0.0.1:8000/ws/ouratimeseries".to_string(),
            api_base_url: "http://127.0.0.1:8000".to_string(),
            resource: "ouratimeseries".to_string(),
            headers,
            update_tags: vec![
                "ouratimeseries_update".to_string(),
                "heartrate_update".to_string(),
            ],
            liveness_tag: "pong".to_string(),
            lookback_hours: 24,
            default_record_limit: 10_000,
            request_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: SyncConfig = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path();
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("biosensor-sync")
            .join("config.json")
    }

    /// Live mode lookback as a signed duration.
    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.lookback_hours))
    }
}

/// Delay schedule between reconnect attempts.
///
/// With the default multiplier of 1.0 every attempt waits `initial_delay`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    #[serde(with = "duration_serde")]
    pub initial_delay: Duration,
    #[serde(with = "duration_serde")]
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            multiplier: 1.0,
        }
    }
}

impl ReconnectPolicy {
    /// Exponential backoff capped at `max_delay`.
    pub fn exponential(initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
        }
    }

    /// Delay before reconnect attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.multiplier <= 1.0 {
            return self.initial_delay;
        }
        let factor = self.multiplier.powi(attempt.min(32) as i32);
        let secs = self.initial_delay.as_secs_f64() * factor;
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped).max(self.initial_delay)
    }
}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(5));
        assert_eq!(config.default_record_limit, 10_000);
        assert_eq!(config.lookback(), chrono::Duration::hours(24));
        assert_eq!(
            config.headers.get("ngrok-skip-browser-warning").map(String::as_str),
            Some("true")
        );
        assert!(config.update_tags.iter().any(|t| t == "heartrate_update"));
    }

    #[test]
    fn test_default_reconnect_is_fixed() {
        let policy = ReconnectPolicy::default();
        for attempt in 0..10 {
            assert_eq!(policy.delay_for(attempt), Duration::from_secs(5));
        }
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy =
            ReconnectPolicy::exponential(Duration::from_secs(1), Duration::from_secs(10), 2.0);
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(4), Duration::from_secs(10));
        assert_eq!(policy.delay_for(100), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_config_file_uses_defaults() {
        let json = r#"{ "ws_url": "ws://sensors.local/ws", "reconnect": { "initial_delay": 2 } }"#;
        let config: SyncConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.ws_url, "ws://sensors.local/ws");
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(2));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(60));
        assert_eq!(config.resource, "ouratimeseries");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = std::env::temp_dir().join(format!("biosensor-sync-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.json");

        let mut config = SyncConfig::default();
        config.lookback_hours = 6;
        config.save_to(&path).unwrap();

        let loaded = SyncConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("biosensor-sync-does-not-exist.json");
        let config = SyncConfig::load_from(&path).unwrap();
        assert_eq!(config, SyncConfig::default());
    }
}
