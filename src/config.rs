//! Configuration types, built from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// When a fetched message loses its unread flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarkReadPolicy {
    /// Immediately after the full payload is fetched, before any generation.
    #[default]
    AfterFetch,
    /// Only once both the summary and the reply draft were produced.
    AfterSummary,
    /// Never touch the unread flag.
    Never,
}

impl std::str::FromStr for MarkReadPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "after_fetch" | "fetch" => Ok(Self::AfterFetch),
            "after_summary" | "summary" => Ok(Self::AfterSummary),
            "never" | "off" => Ok(Self::Never),
            other => Err(ConfigError::InvalidValue {
                key: "MARK_READ".into(),
                message: format!("expected after_fetch, after_summary or never, got '{other}'"),
            }),
        }
    }
}

/// Gmail transport configuration.
#[derive(Debug, Clone)]
pub struct MailConfig {
    /// Google "installed app" client secret JSON.
    pub credentials_path: PathBuf,
    /// Persisted authorized-user credential JSON.
    pub token_path: PathBuf,
    /// Maximum messages listed per batch.
    pub max_results: u32,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            credentials_path: PathBuf::from("secrets/credentials.json"),
            token_path: PathBuf::from("secrets/token.json"),
            max_results: 10,
        }
    }
}

/// API key + model for one generation provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: Option<SecretString>,
    pub model: String,
    /// Overrides the provider's API root (proxies, local mocks).
    pub base_url: Option<String>,
}

/// Pipeline behaviour.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub mark_read: MarkReadPolicy,
    /// Enables the recurring fetch timer.
    pub auto_fetch: bool,
    pub auto_fetch_interval: Duration,
    pub worker_pool_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mark_read: MarkReadPolicy::AfterFetch,
            auto_fetch: false,
            auto_fetch_interval: Duration::from_secs(900), // 15 minutes
            worker_pool_size: 4,
        }
    }
}

/// Logging destinations.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub dir: PathBuf,
    pub file: String,
}

/// Complete application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mail: MailConfig,
    /// Email summarization (Gemini).
    pub gemini: ProviderConfig,
    /// Reply drafting (Mistral).
    pub mistral_reply: ProviderConfig,
    /// Document summary and chat (Mistral).
    pub mistral_doc: ProviderConfig,
    pub pipeline: PipelineConfig,
    pub log: LogConfig,
    pub listen_addr: SocketAddr,
}

impl AppConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let secret = |key: &str| get(key).map(SecretString::from);

        let gemini = ProviderConfig {
            api_key: secret("GEMINI_API_KEY"),
            model: get("GEMINI_MODEL").unwrap_or_else(|| "gemini-1.5-flash".to_string()),
            base_url: get("GEMINI_BASE_URL"),
        };
        let mistral_reply = ProviderConfig {
            api_key: secret("MISTRAL_REPLY_API_KEY"),
            model: get("MISTRAL_REPLY_MODEL").unwrap_or_else(|| "ministral-8b-latest".to_string()),
            base_url: get("MISTRAL_BASE_URL"),
        };
        let mistral_doc = ProviderConfig {
            api_key: secret("MISTRAL_API_KEY"),
            model: get("MISTRAL_DOC_MODEL").unwrap_or_else(|| "ministral-3b-2410".to_string()),
            base_url: get("MISTRAL_BASE_URL"),
        };

        if gemini.api_key.is_none() && mistral_doc.api_key.is_none() {
            return Err(ConfigError::MissingRequired {
                key: "GEMINI_API_KEY or MISTRAL_API_KEY".into(),
                hint: "Set at least one generation provider key.".into(),
            });
        }

        let defaults = MailConfig::default();
        let mail = MailConfig {
            credentials_path: get("GMAIL_CREDENTIALS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.credentials_path),
            token_path: get("GMAIL_TOKEN_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.token_path),
            max_results: parse_or(get("MAX_EMAILS_TO_FETCH"), "MAX_EMAILS_TO_FETCH", 10)?,
        };

        let pipeline_defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            mark_read: match get("MARK_READ") {
                Some(v) => v.parse()?,
                None => pipeline_defaults.mark_read,
            },
            auto_fetch: get("AUTO_FETCH").is_some_and(|v| parse_bool(&v)),
            auto_fetch_interval: Duration::from_secs(parse_or(
                get("AUTO_FETCH_INTERVAL_SECS"),
                "AUTO_FETCH_INTERVAL_SECS",
                pipeline_defaults.auto_fetch_interval.as_secs(),
            )?),
            worker_pool_size: parse_or(
                get("WORKER_POOL_SIZE"),
                "WORKER_POOL_SIZE",
                pipeline_defaults.worker_pool_size,
            )?
            .max(1),
        };

        let log = LogConfig {
            level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            dir: get("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("logs")),
            file: get("LOG_FILE").unwrap_or_else(|| "mail-assist.log".to_string()),
        };

        let host = get("MAIL_ASSIST_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port: u16 = parse_or(get("MAIL_ASSIST_PORT"), "MAIL_ASSIST_PORT", 5000)?;
        let listen_addr: SocketAddr =
            format!("{host}:{port}")
                .parse()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "MAIL_ASSIST_HOST".into(),
                    message: format!("{e}"),
                })?;

        Ok(Self {
            mail,
            gemini,
            mistral_reply,
            mistral_doc,
            pipeline,
            log,
            listen_addr,
        })
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => v.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
