//! Raw configuration inputs: the TOML file shape and the environment.

use serde::Deserialize;
use std::path::PathBuf;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub portals: FilePortalsConfig,
    pub vision: Option<FileVisionConfig>,
    #[serde(default)]
    pub storage: FileStorageConfig,
    #[serde(default)]
    pub security: FileSecurityConfig,
    #[serde(default)]
    pub schedule: FileScheduleConfig,
    #[serde(default)]
    pub notify: FileNotifyConfig,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub public_base: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileDatabaseConfig {
    pub url: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FilePortalsConfig {
    pub federal_url: Option<String>,
    pub state_url: Option<String>,
    pub attempt_timeout_secs: Option<u64>,
    pub element_timeout_secs: Option<u64>,
    pub retry_delay_secs: Option<u64>,
    pub inter_case_delay_secs: Option<u64>,
    pub auto_apply_state: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileVisionConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileStorageConfig {
    pub root: Option<PathBuf>,
    pub signing_key: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileSecurityConfig {
    pub identifier_key: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileScheduleConfig {
    pub interval_minutes: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileNotifyConfig {
    pub webhook_url: Option<String>,
}

/// Values gathered from the process environment. Environment always wins
/// over the file.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub database_url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub public_base: Option<String>,
    pub identifier_key: Option<String>,
    pub signing_key: Option<String>,
    pub vision_api_key: Option<String>,
    pub notify_webhook_url: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self {
            config_path: var("REFUNDWATCH_CONFIG").map(PathBuf::from),
            database_url: var("DATABASE_URL"),
            host: var("REFUNDWATCH_HOST"),
            port: var("REFUNDWATCH_PORT").and_then(|p| p.parse().ok()),
            public_base: var("REFUNDWATCH_PUBLIC_BASE"),
            identifier_key: var("REFUNDWATCH_IDENTIFIER_KEY"),
            signing_key: var("REFUNDWATCH_SIGNING_KEY"),
            vision_api_key: var("REFUNDWATCH_VISION_API_KEY"),
            notify_webhook_url: var("REFUNDWATCH_NOTIFY_WEBHOOK"),
        }
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
