use anyhow::{anyhow, Result};
use serde::Deserialize;
use url::Url;

use crate::utils::constants::{
    BATCH_PATH, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_REDIRECTS, DEFAULT_MAX_REQUEST_ATTEMPTS,
    DEFAULT_REFRESH_MARGIN_SECS, TOKEN_PATH, USER_AGENT,
};

/// ================================
/// Client-wide settings
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct ClientSettings {
    pub api: ApiConfig,
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,
    #[serde(default = "default_refresh_margin_seconds")]
    pub refresh_margin_seconds: u64,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    /// versioned API root, e.g. https://api.example.com/2.0
    pub base_url: String,
    /// defaults to `<origin>/oauth2/token`
    pub token_url: Option<String>,
    /// defaults to `<base_url>/batch`
    pub batch_url: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CredentialsConfig {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RetryConfig {
    pub attempts: Option<u32>,
    /// multiplied by 2^exponent and a random jitter factor before every retry
    pub base_delay_ms: Option<u64>,
}

impl ClientSettings {
    pub fn new(base_url: &str, client_id: &str, client_secret: &str) -> Self {
        Self {
            api: ApiConfig {
                base_url: base_url.to_owned(),
                token_url: None,
                batch_url: None,
                user_agent: None,
            },
            credentials: CredentialsConfig {
                client_id: client_id.to_owned(),
                client_secret: client_secret.to_owned(),
            },
            retry: RetryConfig::default(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            refresh_margin_seconds: DEFAULT_REFRESH_MARGIN_SECS,
            logging: None,
        }
    }

    pub fn base_url(&self) -> Result<Url> {
        parse_url("api.base_url", self.api.base_url.trim_end_matches('/'))
    }

    pub fn token_url(&self) -> Result<Url> {
        match &self.api.token_url {
            Some(url) => parse_url("api.token_url", url),
            None => {
                let base = self.base_url()?;
                base.join(TOKEN_PATH)
                    .map_err(|e| anyhow!("cannot derive token url from '{}': {}", base, e))
            }
        }
    }

    pub fn batch_url(&self) -> Result<Url> {
        match &self.api.batch_url {
            Some(url) => parse_url("api.batch_url", url),
            None => parse_url(
                "api.base_url",
                &format!("{}{}", self.api.base_url.trim_end_matches('/'), BATCH_PATH),
            ),
        }
    }

    pub fn user_agent(&self) -> &str {
        self.api.user_agent.as_deref().unwrap_or(USER_AGENT)
    }

    pub fn max_attempts(&self) -> u32 {
        self.retry.attempts.unwrap_or(DEFAULT_MAX_REQUEST_ATTEMPTS)
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.retry.base_delay_ms.unwrap_or(DEFAULT_BASE_DELAY_MS)
    }
}

fn parse_url(field: &str, raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| anyhow!("{} '{}' is not a valid url: {}", field, raw, e))
}

fn default_max_redirects() -> u32 {
    DEFAULT_MAX_REDIRECTS
}

fn default_refresh_margin_seconds() -> u64 {
    DEFAULT_REFRESH_MARGIN_SECS
}

/// ================================
/// Logging
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String, // allowed: trace, debug, info, warn, error
    pub format: LogFormat,
}

impl LoggingConfig {
    pub fn new(level: String, format: LogFormat) -> Self {
        Self { level, format }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_owned(), format: LogFormat::from_env() }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Compact,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT")
            .unwrap_or_else(|_| "json".to_string())
            .to_lowercase()
            .as_str()
        {
            "compact" | "text" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}
