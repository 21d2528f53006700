//! Configuration types for the deployment sync service

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
}

/// Deployments REST API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            timeout_seconds: default_api_timeout(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Push notification channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    #[serde(default = "default_push_base_url")]
    pub base_url: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_event_name")]
    pub event_name: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            base_url: default_push_base_url(),
            topic: default_topic(),
            event_name: default_event_name(),
            connect_timeout_seconds: default_connect_timeout(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl PushConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

/// Reconnection policy for a dropped push connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// `None` retries forever
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            max_retries: None,
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt `attempt` (1-based), doubling up to the cap
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Sync controller behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Deployment id every rename is written to
    #[serde(default = "default_rename_target_id")]
    pub rename_target_id: i64,
    /// Discard refresh responses older than the latest applied one
    #[serde(default)]
    pub sequence_refreshes: bool,
    /// Stop the service when the push subscription cannot be set up
    #[serde(default)]
    pub exit_on_push_failure: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            rename_target_id: default_rename_target_id(),
            sequence_refreshes: false,
            exit_on_push_failure: false,
        }
    }
}

fn default_api_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_api_timeout() -> u64 {
    30
}

fn default_push_base_url() -> String {
    "ws://localhost:5000".to_string()
}

fn default_topic() -> String {
    "deployments".to_string()
}

fn default_event_name() -> String {
    "deployment_updated".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_initial_backoff() -> u64 {
    1000
}

fn default_max_backoff() -> u64 {
    30_000
}

fn default_rename_target_id() -> i64 {
    1
}

/// Load configuration from a JSON file
pub fn load_config(path: &Path) -> crate::Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        crate::SyncError::Config(format!("Failed to read config file {:?}: {}", path, e))
    })?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}
