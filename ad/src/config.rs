//! agentd configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{Context, Result};
use rand::Rng as _;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Smallest interval any timer may be configured to, in seconds. Remote
/// overrides and typos below this are clamped rather than rejected.
pub const INTERVAL_FLOOR_SECS: u64 = 30;

/// Main agentd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Agent identity and local storage
    pub agent: AgentConfig,

    /// Backend API endpoints
    pub api: ApiConfig,

    /// Service timer intervals
    pub intervals: IntervalsConfig,

    /// Outbound HTTP behavior
    pub http: HttpConfig,

    /// Metrics collection
    pub monitoring: MonitoringConfig,

    /// Logging
    pub logging: LoggingConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.is_empty() {
            return Err(eyre::eyre!("api.base-url must not be empty"));
        }
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            return Err(eyre::eyre!("api.base-url must be an http(s) URL, got {}", self.api.base_url));
        }
        if self.monitoring.command.is_empty() {
            return Err(eyre::eyre!("monitoring.command must not be empty"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .agentd.yml
        let local_config = PathBuf::from(".agentd.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/agentd/agentd.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("agentd").join("agentd.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Peek at the configured log level without committing to a full config.
    /// Used before the subscriber exists, so parse errors are swallowed.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|config| config.logging.level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Path of the persisted device id file.
    pub fn device_id_path(&self) -> PathBuf {
        self.agent.data_dir.join(&self.agent.device_id_file)
    }

    /// Path of the persisted access token.
    pub fn token_path(&self) -> PathBuf {
        self.agent.data_dir.join("access-token.json")
    }
}

/// Agent identity and local storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Directory holding the device id and token files
    #[serde(rename = "data-dir")]
    pub data_dir: PathBuf,

    /// File name of the persisted device id, relative to data-dir
    #[serde(rename = "device-id-file")]
    pub device_id_file: String,

    /// Command printing a device-unique id on stdout; a UUID is generated
    /// when unset or failing
    #[serde(rename = "identity-command")]
    pub identity_command: Option<String>,

    /// Development profile: local backend, relative data dir
    pub dev: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        // XDG data directory (~/.local/share/agentd on Linux)
        let data_dir = dirs::data_dir()
            .map(|d| d.join("agentd"))
            .unwrap_or_else(|| PathBuf::from(".agentd"));

        Self {
            data_dir,
            device_id_file: "device-id".to_string(),
            identity_command: None,
            dev: false,
        }
    }
}

/// Backend API endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL for status posts, token requests, config sync and ingest
    #[serde(rename = "base-url")]
    pub base_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
        }
    }
}

/// Service timer intervals, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalsConfig {
    /// Lower bound of the randomized monitoring interval
    #[serde(rename = "monitoring-min")]
    pub monitoring_min: u64,

    /// Upper bound of the randomized monitoring interval
    #[serde(rename = "monitoring-max")]
    pub monitoring_max: u64,

    /// Device status report interval
    #[serde(rename = "device-status")]
    pub device_status: u64,

    /// Access token refresh check interval
    #[serde(rename = "access-token")]
    pub access_token: u64,

    /// Remote config sync interval
    #[serde(rename = "config-sync")]
    pub config_sync: u64,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            monitoring_min: 300,
            monitoring_max: 900,
            device_status: 120,
            access_token: 10_800,
            config_sync: 600,
        }
    }
}

impl IntervalsConfig {
    /// Randomized monitoring interval: a fresh draw from `[min, max]`,
    /// clamped to the floor and re-ordered if min > max. min == max gives a
    /// fixed period.
    pub fn draw_monitoring_interval(&self) -> u64 {
        let lo = self.monitoring_min.max(INTERVAL_FLOOR_SECS);
        let hi = self.monitoring_max.max(lo);
        rand::rng().random_range(lo..=hi)
    }

    pub fn device_status_interval(&self) -> u64 {
        self.device_status.max(INTERVAL_FLOOR_SECS)
    }

    pub fn access_token_interval(&self) -> u64 {
        self.access_token.max(INTERVAL_FLOOR_SECS)
    }

    pub fn config_sync_interval(&self) -> u64 {
        self.config_sync.max(INTERVAL_FLOOR_SECS)
    }
}

/// Outbound HTTP behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout in seconds; keeps task actions bounded
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

/// Metrics collection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Collector command; must print `key: value` lines on stdout
    pub command: String,

    /// Ingest topic for monitoring reports
    pub topic: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            command: "/usr/libexec/agentd/collect-metrics".to_string(),
            topic: "monitoring/device-data".to_string(),
        }
    }
}

/// Logging
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace|debug|info|warn|error); CLI flag wins over this
    pub level: Option<String>,
}

/// Shared, reloadable view of the configuration.
///
/// Services hold a clone and take a fresh snapshot at the top of every cycle,
/// so interval and endpoint changes (SIGHUP reload, remote config sync) take
/// effect at the next reschedule without a restart.
#[derive(Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Config>>,
}

impl SharedConfig {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Owned copy of the current configuration.
    pub async fn snapshot(&self) -> Config {
        self.inner.read().await.clone()
    }

    /// Swap in a replacement configuration.
    pub async fn replace(&self, config: Config) {
        *self.inner.write().await = config;
    }

    /// Apply a closure to the live configuration under the write lock.
    pub async fn update<F>(&self, apply: F)
    where
        F: FnOnce(&mut Config),
    {
        let mut guard = self.inner.write().await;
        apply(&mut guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.api.base_url, "http://127.0.0.1:8080");
        assert_eq!(config.intervals.monitoring_min, 300);
        assert_eq!(config.intervals.monitoring_max, 900);
        assert_eq!(config.intervals.device_status, 120);
        assert_eq!(config.intervals.access_token, 10_800);
        assert_eq!(config.http.timeout_secs, 10);
        assert!(!config.agent.dev);
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
agent:
  data-dir: /var/lib/agentd
  device-id-file: id
  dev: true

api:
  base-url: https://api.example.com

intervals:
  monitoring-min: 60
  monitoring-max: 120
  device-status: 30
  config-sync: 900

monitoring:
  command: "/usr/bin/true"
  topic: custom/topic
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.agent.data_dir, PathBuf::from("/var/lib/agentd"));
        assert_eq!(config.agent.device_id_file, "id");
        assert!(config.agent.dev);
        assert_eq!(config.api.base_url, "https://api.example.com");
        assert_eq!(config.intervals.monitoring_min, 60);
        assert_eq!(config.intervals.device_status, 30);
        assert_eq!(config.intervals.config_sync, 900);
        assert_eq!(config.monitoring.topic, "custom/topic");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
intervals:
  device-status: 45
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        // Specified value
        assert_eq!(config.intervals.device_status, 45);

        // Defaults for unspecified
        assert_eq!(config.intervals.monitoring_min, 300);
        assert_eq!(config.api.base_url, "http://127.0.0.1:8080");
        assert_eq!(config.monitoring.topic, "monitoring/device-data");
    }

    #[test]
    fn test_validate_rejects_bad_base_url() {
        let mut config = Config::default();
        config.api.base_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());

        config.api.base_url = String::new();
        assert!(config.validate().is_err());

        config.api.base_url = "https://api.example.com".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_monitoring_interval_within_bounds() {
        let intervals = IntervalsConfig {
            monitoring_min: 300,
            monitoring_max: 900,
            ..Default::default()
        };

        for _ in 0..50 {
            let drawn = intervals.draw_monitoring_interval();
            assert!((300..=900).contains(&drawn), "drawn {drawn} out of range");
        }
    }

    #[test]
    fn test_monitoring_interval_fixed_when_min_equals_max() {
        let intervals = IntervalsConfig {
            monitoring_min: 600,
            monitoring_max: 600,
            ..Default::default()
        };
        assert_eq!(intervals.draw_monitoring_interval(), 600);
    }

    #[test]
    fn test_interval_floor_clamps_tiny_values() {
        let intervals = IntervalsConfig {
            monitoring_min: 1,
            monitoring_max: 2,
            device_status: 0,
            ..Default::default()
        };

        assert!(intervals.draw_monitoring_interval() >= INTERVAL_FLOOR_SECS);
        assert_eq!(intervals.device_status_interval(), INTERVAL_FLOOR_SECS);
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("agentd.yml");
        fs::write(&path, "logging:\n  level: debug\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.logging.level.as_deref(), Some("debug"));

        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("debug"));
    }

    #[test]
    fn test_load_explicit_missing_path_errors() {
        let missing = PathBuf::from("/nonexistent/agentd.yml");
        assert!(Config::load(Some(&missing)).is_err());
    }

    #[tokio::test]
    async fn test_shared_config_snapshot_and_replace() {
        let shared = SharedConfig::new(Config::default());
        assert_eq!(shared.snapshot().await.intervals.device_status, 120);

        let mut next = Config::default();
        next.intervals.device_status = 300;
        shared.replace(next).await;
        assert_eq!(shared.snapshot().await.intervals.device_status, 300);

        shared.update(|config| config.intervals.config_sync = 1_200).await;
        assert_eq!(shared.snapshot().await.intervals.config_sync, 1_200);
    }
}
