use std::{env, fmt, str::FromStr, time::Duration};

use anyhow::{Context, Result, bail};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_CHAT_MODEL: &str = "openrouter/openai/gpt-4o-mini";
const DEFAULT_HF_MODEL: &str = "menudongbibe/summarizationmodel";
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 5;
const DEFAULT_MODEL_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_MODEL_RETRY_DELAY_MS: u64 = 1000;

/// Which generation capability answers evaluation prompts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackendKind {
    Chat,
    HuggingFace,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Chat => write!(f, "chat"),
            BackendKind::HuggingFace => write!(f, "huggingface"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "chat" | "openrouter" | "poe" => Ok(BackendKind::Chat),
            "huggingface" | "hf" => Ok(BackendKind::HuggingFace),
            other => bail!("unsupported GENERATION_BACKEND: {other}"),
        }
    }
}

/// Process-wide settings read once at startup.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// `None` selects the process-local store.
    pub database_url: Option<String>,
    pub port: u16,
    pub backend: BackendKind,
    pub model: String,
    pub fetch_timeout: Duration,
    pub model_timeout: Duration,
    pub max_concurrent_fetches: usize,
    pub retry: RetryPolicy,
}

/// Retry schedule applied by the orchestrator around model calls.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.initial_delay * 2_u32.saturating_pow(attempt.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MODEL_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(DEFAULT_MODEL_RETRY_DELAY_MS),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty());

        let backend = match env::var("GENERATION_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => BackendKind::Chat,
        };

        let model = env::var("GENERATION_MODEL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| match backend {
                BackendKind::Chat => DEFAULT_CHAT_MODEL.to_string(),
                BackendKind::HuggingFace => DEFAULT_HF_MODEL.to_string(),
            });

        let max_concurrent_fetches =
            parse_var("MAX_CONCURRENT_FETCHES", DEFAULT_MAX_CONCURRENT_FETCHES)?;
        if max_concurrent_fetches == 0 {
            bail!("MAX_CONCURRENT_FETCHES must be at least 1");
        }

        let max_attempts = parse_var("MODEL_MAX_ATTEMPTS", DEFAULT_MODEL_MAX_ATTEMPTS)?;
        if max_attempts == 0 {
            bail!("MODEL_MAX_ATTEMPTS must be at least 1");
        }

        Ok(Self {
            database_url,
            port: parse_var("PORT", DEFAULT_PORT)?,
            backend,
            model,
            fetch_timeout: Duration::from_secs(parse_var(
                "FETCH_TIMEOUT_SECS",
                DEFAULT_FETCH_TIMEOUT_SECS,
            )?),
            model_timeout: Duration::from_secs(parse_var(
                "MODEL_TIMEOUT_SECS",
                DEFAULT_MODEL_TIMEOUT_SECS,
            )?),
            max_concurrent_fetches,
            retry: RetryPolicy {
                max_attempts,
                initial_delay: Duration::from_millis(parse_var(
                    "MODEL_RETRY_DELAY_MS",
                    DEFAULT_MODEL_RETRY_DELAY_MS,
                )?),
            },
        })
    }
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        _ => Ok(default),
    }
}
