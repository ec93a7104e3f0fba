use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::workflows::candidates::OwnerId;
use crate::workflows::notify::{NotifyConfig, PushSchedule, ScheduleError};

/// Worker pool size used when `BATCH_CONCURRENCY` is unset or not positive.
pub const DEFAULT_BATCH_CONCURRENCY: usize = 5;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub batch: BatchConfig,
    pub evaluation: EvaluationClientConfig,
    pub fetch: FetchConfig,
    pub notify: NotifyConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let concurrency = match env::var("BATCH_CONCURRENCY") {
            Ok(raw) => raw
                .trim()
                .parse::<i64>()
                .map_err(|_| ConfigError::InvalidConcurrency { value: raw.clone() })?,
            Err(_) => DEFAULT_BATCH_CONCURRENCY as i64,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            batch: BatchConfig::from_requested(concurrency),
            evaluation: EvaluationClientConfig::from_env(),
            fetch: FetchConfig::from_env(),
            notify: notify_from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Bounded worker pool used by batch evaluation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    pub concurrency: usize,
}

impl BatchConfig {
    /// Non-positive requests fall back to the default pool size.
    pub fn from_requested(requested: i64) -> Self {
        let concurrency = if requested <= 0 {
            DEFAULT_BATCH_CONCURRENCY
        } else {
            requested as usize
        };
        Self { concurrency }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_BATCH_CONCURRENCY,
        }
    }
}

/// Connection details for the hosted scoring workflow.
#[derive(Debug, Clone)]
pub struct EvaluationClientConfig {
    pub base_url: String,
    pub token: String,
    pub workflow_id: String,
}

impl EvaluationClientConfig {
    fn from_env() -> Self {
        Self {
            base_url: env::var("COZE_BASE_URL")
                .unwrap_or_else(|_| "https://api.coze.cn".to_string())
                .trim_end_matches('/')
                .to_string(),
            token: env::var("COZE_TOKEN").unwrap_or_default(),
            workflow_id: env::var("COZE_WORKFLOW_ID").unwrap_or_default(),
        }
    }
}

/// Settings for the external scraping script that supplies candidate items.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub script: PathBuf,
    pub python: Option<PathBuf>,
    /// Credential pairs exported to the script environment.
    pub credentials: BTreeMap<String, String>,
}

impl FetchConfig {
    fn from_env() -> Self {
        let mut credentials = BTreeMap::new();
        if let Ok(username) = env::var("FETCH_USERNAME") {
            credentials.insert("WT_USERNAME".to_string(), username);
        }
        if let Ok(password) = env::var("FETCH_PASSWORD") {
            credentials.insert("WT_PASSWORD".to_string(), password);
        }

        Self {
            script: env::var("FETCH_SCRIPT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("scripts/wintalent_fetch.py")),
            python: env::var("FETCH_PYTHON")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from),
            credentials,
        }
    }
}

fn notify_from_env() -> Result<NotifyConfig, ConfigError> {
    let raw_time = env::var("DINGTALK_PUSH_TIME").unwrap_or_else(|_| "09:00".to_string());
    let schedule = raw_time
        .parse::<PushSchedule>()
        .map_err(|source| ConfigError::InvalidPushTime {
            value: raw_time.clone(),
            source,
        })?;

    let push_limit = match env::var("DINGTALK_PUSH_LIMIT") {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map_err(|_| ConfigError::InvalidPushLimit { value: raw.clone() })?,
        Err(_) => 10,
    };

    let owner = match env::var("DINGTALK_OWNER_ID") {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(OwnerId)
            .map_err(|_| ConfigError::InvalidOwner { value: raw.clone() })?,
        Err(_) => OwnerId(1),
    };

    Ok(NotifyConfig {
        owner,
        name: env::var("DINGTALK_NAME").unwrap_or_else(|_| "default".to_string()),
        webhook: env::var("DINGTALK_WEBHOOK").unwrap_or_default(),
        secret: env::var("DINGTALK_SECRET")
            .ok()
            .filter(|secret| !secret.trim().is_empty()),
        schedule,
        push_limit,
        at_user_ids: NotifyConfig::parse_at_user_ids(
            &env::var("DINGTALK_AT_USER_IDS").unwrap_or_default(),
        ),
        enabled: flag("DINGTALK_ENABLED"),
        auto_push_on_complete: flag("DINGTALK_AUTO_PUSH"),
    })
}

fn flag(key: &str) -> bool {
    env::var(key)
        .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidConcurrency { value: String },
    InvalidPushTime { value: String, source: ScheduleError },
    InvalidPushLimit { value: String },
    InvalidOwner { value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidConcurrency { value } => {
                write!(f, "BATCH_CONCURRENCY must be an integer, got '{value}'")
            }
            ConfigError::InvalidPushTime { value, .. } => {
                write!(f, "DINGTALK_PUSH_TIME must be HH:MM, got '{value}'")
            }
            ConfigError::InvalidPushLimit { value } => {
                write!(f, "DINGTALK_PUSH_LIMIT must be a non-negative integer, got '{value}'")
            }
            ConfigError::InvalidOwner { value } => {
                write!(f, "DINGTALK_OWNER_ID must be a numeric owner id, got '{value}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPushTime { source, .. } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidConcurrency { .. }
            | ConfigError::InvalidPushLimit { .. }
            | ConfigError::InvalidOwner { .. } => None,
        }
    }
}

/// Serializes every test in the crate that reads or writes process environment variables.
#[cfg(test)]
pub(crate) fn env_guard() -> &'static std::sync::Mutex<()> {
    static GUARD: std::sync::OnceLock<std::sync::Mutex<()>> = std::sync::OnceLock::new();
    GUARD.get_or_init(|| std::sync::Mutex::new(()))
}
