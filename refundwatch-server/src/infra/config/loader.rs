use once_cell::sync::Lazy;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

use super::{
    models::{
        Config, DatabaseConfig, NotifyConfig, PortalsConfig, ScheduleConfig,
        SecurityConfig, ServerConfig, StorageConfig, VisionConfig,
    },
    sources::{EnvConfig, FileConfig},
};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("refundwatch.toml"),
        PathBuf::from("config/refundwatch.toml"),
    ]
});

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8710;
const DEFAULT_SCHEDULE_MINUTES: u64 = 240;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("config file {path} does not exist")]
    MissingConfig { path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Unparsable {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("dotenv error: {0}")]
    DotEnv(#[from] dotenvy::Error),

    #[error("{0}")]
    Invalid(String),
}

/// Non-fatal findings surfaced at startup.
#[derive(Debug, Default)]
pub struct ConfigWarnings(pub Vec<String>);

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

#[derive(Debug, Default)]
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn new() -> Self {
        Self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        // A missing .env is normal; anything else is a real error.
        dotenvy::dotenv().map(|_| ()).or_else(|err| match err {
            dotenvy::Error::Io(_) => Ok(()),
            _ => Err(err),
        })?;

        let env = EnvConfig::gather();
        let (file, path) = self.load_file_config(&env)?;
        compose(file.unwrap_or_default(), env, path)
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        // An explicit path from the environment must exist; default
        // locations are optional.
        let (candidate, explicit) = if let Some(path) = &env.config_path {
            (Some(path.clone()), true)
        } else {
            (
                DEFAULT_CONFIG_LOCATIONS
                    .iter()
                    .find(|candidate| candidate.exists())
                    .cloned(),
                false,
            )
        };

        let Some(path) = candidate else {
            return Ok((None, None));
        };
        if !path.exists() {
            if explicit {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let raw = fs::read_to_string(&path).map_err(|source| {
            ConfigLoadError::Unreadable {
                path: path.clone(),
                source,
            }
        })?;
        let parsed = toml::from_str(&raw).map_err(|source| {
            ConfigLoadError::Unparsable {
                path: path.clone(),
                source,
            }
        })?;
        Ok((Some(parsed), Some(path)))
    }
}

fn compose(
    file: FileConfig,
    env: EnvConfig,
    path: Option<PathBuf>,
) -> Result<ConfigLoad, ConfigLoadError> {
    let mut warnings = ConfigWarnings::default();
    if let Some(path) = &path {
        tracing::debug!(path = %path.display(), "configuration file loaded");
    }

    let database_url = env
        .database_url
        .or(file.database.url)
        .ok_or_else(|| {
            ConfigLoadError::Invalid(
                "no database URL configured (set DATABASE_URL or \
                 [database].url)"
                    .to_string(),
            )
        })?;

    let identifier_key = env
        .identifier_key
        .or(file.security.identifier_key)
        .ok_or_else(|| {
            ConfigLoadError::Invalid(
                "no identifier key configured (set \
                 REFUNDWATCH_IDENTIFIER_KEY or [security].identifier_key)"
                    .to_string(),
            )
        })?;

    let signing_key = match env.signing_key.or(file.storage.signing_key) {
        Some(key) => key,
        None => {
            warnings.0.push(
                "no screenshot signing key configured; falling back to the \
                 identifier key"
                    .to_string(),
            );
            identifier_key.clone()
        }
    };

    let portals = {
        let p = file.portals;
        PortalsConfig {
            federal_url: p.federal_url.ok_or_else(|| {
                ConfigLoadError::Invalid(
                    "[portals].federal_url is required".to_string(),
                )
            })?,
            state_url: p.state_url.ok_or_else(|| {
                ConfigLoadError::Invalid(
                    "[portals].state_url is required".to_string(),
                )
            })?,
            attempt_timeout: Duration::from_secs(
                p.attempt_timeout_secs.unwrap_or(90),
            ),
            element_timeout: Duration::from_secs(
                p.element_timeout_secs.unwrap_or(20),
            ),
            retry_delay: Duration::from_secs(p.retry_delay_secs.unwrap_or(15)),
            inter_case_delay: Duration::from_secs(
                p.inter_case_delay_secs.unwrap_or(20),
            ),
            auto_apply_state: p.auto_apply_state.unwrap_or(false),
        }
    };

    if portals.auto_apply_state {
        warnings.0.push(
            "auto_apply_state is enabled: state-portal results will skip \
             the approval gate"
                .to_string(),
        );
    }

    let vision = match file.vision {
        Some(v) => {
            let api_key = env.vision_api_key.or(v.api_key);
            match api_key {
                Some(api_key) => Some(VisionConfig {
                    endpoint: v.endpoint,
                    api_key,
                    model: v.model,
                }),
                None => {
                    warnings.0.push(
                        "[vision] configured without an API key; vision \
                         extraction disabled, text fallback only"
                            .to_string(),
                    );
                    None
                }
            }
        }
        None => {
            warnings.0.push(
                "no [vision] section; vision extraction disabled, text \
                 fallback only"
                    .to_string(),
            );
            None
        }
    };

    let host = env.host.or(file.server.host).unwrap_or_else(|| {
        DEFAULT_HOST.to_string()
    });
    let port = env.port.or(file.server.port).unwrap_or(DEFAULT_PORT);
    let public_base = env
        .public_base
        .or(file.server.public_base)
        .unwrap_or_else(|| format!("http://{host}:{port}"));

    let config = Config {
        server: ServerConfig {
            host,
            port,
            public_base,
        },
        database: DatabaseConfig { url: database_url },
        portals,
        vision,
        storage: StorageConfig {
            root: file
                .storage
                .root
                .unwrap_or_else(|| Path::new("data/screenshots").into()),
            signing_key,
        },
        security: SecurityConfig { identifier_key },
        schedule: ScheduleConfig {
            interval_minutes: file
                .schedule
                .interval_minutes
                .unwrap_or(DEFAULT_SCHEDULE_MINUTES),
        },
        notify: NotifyConfig {
            webhook_url: env
                .notify_webhook_url
                .or(file.notify.webhook_url),
        },
    };

    if config.schedule.interval_minutes == 0 {
        warnings.0.push(
            "schedule interval is 0; scheduled batch runs disabled"
                .to_string(),
        );
    }

    Ok(ConfigLoad { config, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(toml: &str) -> FileConfig {
        toml::from_str(toml).expect("test TOML parses")
    }

    const MINIMAL: &str = r#"
        [database]
        url = "postgres://localhost/refundwatch"

        [security]
        identifier_key = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="

        [portals]
        federal_url = "https://refunds.example.gov/lookup"
        state_url = "https://tax.state.example.us/refund"
    "#;

    #[test]
    fn minimal_file_composes_with_defaults() {
        let load =
            compose(file(MINIMAL), EnvConfig::default(), None).expect("load");
        let config = load.config;

        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.portals.retry_delay, Duration::from_secs(15));
        assert!(!config.portals.auto_apply_state);
        assert!(config.vision.is_none());
        assert_eq!(
            config.schedule.interval_minutes,
            DEFAULT_SCHEDULE_MINUTES
        );
        // Signing key fell back and said so.
        assert!(
            load.warnings
                .0
                .iter()
                .any(|w| w.contains("signing key"))
        );
    }

    #[test]
    fn environment_overrides_file() {
        let env = EnvConfig {
            database_url: Some("postgres://db.internal/refunds".into()),
            port: Some(9000),
            ..EnvConfig::default()
        };
        let config = compose(file(MINIMAL), env, None)
            .expect("load")
            .config;
        assert_eq!(config.database.url, "postgres://db.internal/refunds");
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn missing_database_url_is_fatal() {
        let toml = r#"
            [security]
            identifier_key = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="
            [portals]
            federal_url = "https://refunds.example.gov/lookup"
            state_url = "https://tax.state.example.us/refund"
        "#;
        let err = compose(file(toml), EnvConfig::default(), None)
            .expect_err("must fail");
        assert!(err.to_string().contains("database URL"));
    }

    #[test]
    fn vision_without_key_degrades_with_warning() {
        let toml = format!(
            "{MINIMAL}\n[vision]\nendpoint = \
             \"https://llm.internal/v1/chat/completions\"\nmodel = \
             \"vision-large\"\n"
        );
        let load = compose(file(&toml), EnvConfig::default(), None)
            .expect("load");
        assert!(load.config.vision.is_none());
        assert!(
            load.warnings
                .0
                .iter()
                .any(|w| w.contains("vision extraction disabled"))
        );
    }
}
