use crate::rules::RuleTable;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

pub use crate::nats::NatsConfig;

/// Complete SIGMA configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SigmaConfig {
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub api: ApiConfig,
    /// Replaces the built-in rule table when present
    #[serde(default)]
    pub rules: Option<RuleTable>,
}

impl SigmaConfig {
    /// Configured rule table, or the built-in thresholds
    pub fn rule_table(&self) -> RuleTable {
        match &self.rules {
            Some(table) => table.clone().normalized(),
            None => RuleTable::builtin(),
        }
    }
}

/// Reading store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    "sigma.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Live viewer fan-out configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Events queued per viewer before it is considered too slow and dropped
    #[serde(default = "default_viewer_buffer")]
    pub viewer_buffer: usize,
    /// Interval between WebSocket pings (seconds)
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

fn default_viewer_buffer() -> usize {
    64
}

fn default_heartbeat_secs() -> u64 {
    30
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            viewer_buffer: default_viewer_buffer(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl HubConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}

/// Ingestion pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Seconds a per-fruit lane may sit idle before its task exits
    #[serde(default = "default_lane_idle_secs")]
    pub lane_idle_secs: u64,
}

fn default_lane_idle_secs() -> u64 {
    60
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            lane_idle_secs: default_lane_idle_secs(),
        }
    }
}

impl IngestConfig {
    pub fn lane_idle(&self) -> Duration {
        Duration::from_secs(self.lane_idle_secs.max(1))
    }
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Dashboard origins allowed by CORS
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    /// Upper bound for `limit` on history queries
    #[serde(default = "default_history_max_limit")]
    pub history_max_limit: usize,
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://127.0.0.1:3000".to_string(),
        "http://localhost:8000".to_string(),
        "http://127.0.0.1:8000".to_string(),
    ]
}

fn default_history_max_limit() -> usize {
    500
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origins: default_cors_origins(),
            history_max_limit: default_history_max_limit(),
        }
    }
}

impl Default for SigmaConfig {
    fn default() -> Self {
        Self {
            nats: NatsConfig::default(),
            store: StoreConfig::default(),
            hub: HubConfig::default(),
            ingest: IngestConfig::default(),
            api: ApiConfig::default(),
            rules: None,
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<SigmaConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path))?;
    let config: SigmaConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file '{}'", path))?;
    Ok(config)
}
