//! Resolved runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub portals: PortalsConfig,
    pub vision: Option<VisionConfig>,
    pub storage: StorageConfig,
    pub security: SecurityConfig,
    pub schedule: ScheduleConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// External base URL used when building signed screenshot links.
    pub public_base: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct PortalsConfig {
    pub federal_url: String,
    pub state_url: String,
    pub attempt_timeout: Duration,
    pub element_timeout: Duration,
    pub retry_delay: Duration,
    pub inter_case_delay: Duration,
    /// Off by default: state results wait for human approval.
    pub auto_apply_state: bool,
}

#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub signing_key: String,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Base64 AES-256 key sealing client identifiers.
    pub identifier_key: String,
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Zero disables the scheduled batch runner.
    pub interval_minutes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
}
