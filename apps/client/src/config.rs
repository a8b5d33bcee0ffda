use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Client configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend_url: String,
    pub auth_token: Option<String>,
    pub state_dir: PathBuf,
    pub session_id: String,
    pub poll_interval: Duration,
    pub tick_interval: Duration,
    pub max_poll_backoff: Duration,
    pub max_poll_failures: u32,
    pub http_timeout: Duration,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            backend_url: require_env("BACKEND_URL")?,
            auth_token: std::env::var("AUTH_TOKEN").ok().filter(|t| !t.is_empty()),
            state_dir: std::env::var("STATE_DIR")
                .unwrap_or_else(|_| ".resume-client".to_string())
                .into(),
            session_id: std::env::var("SESSION_ID").unwrap_or_else(|_| "default".to_string()),
            poll_interval: Duration::from_millis(parse_env("POLL_INTERVAL_MS", 2000)?),
            tick_interval: Duration::from_millis(parse_env("TICK_INTERVAL_MS", 1000)?),
            max_poll_backoff: Duration::from_millis(parse_env("MAX_POLL_BACKOFF_MS", 30_000)?),
            max_poll_failures: parse_env("MAX_POLL_FAILURES", 10)?,
            http_timeout: Duration::from_secs(parse_env("HTTP_TIMEOUT_SECS", 60)?),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        Err(_) => Ok(default),
    }
}
