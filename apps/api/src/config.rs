use std::str::FromStr;
use std::time::Duration;

use anyhow::{ensure, Context, Result};

use crate::llm_client::DEFAULT_MODEL;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub anthropic_api_key: String,
    pub port: u16,
    pub rust_log: String,
    pub analysis: AnalysisConfig,
}

/// Tuning knobs for the incremental analysis scheduler.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Backlog length required before a tick may dispatch.
    pub min_new_feedbacks_for_analysis: usize,
    /// Hard cap on items in one LLM request.
    pub max_feedbacks_in_context: usize,
    /// Estimated prompt + response token budget for one request.
    pub max_tokens_per_request: u32,
    pub enable_debounce: bool,
    /// Only consulted when `enable_debounce` is set.
    pub debounce_minutes: u64,
    pub tick_interval: Duration,
    /// Bounded handoff between `enqueue` callers and the tick loop.
    pub intake_capacity: usize,
    pub shutdown_timeout: Duration,
    pub model: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_new_feedbacks_for_analysis: 10,
            max_feedbacks_in_context: 100,
            max_tokens_per_request: 100_000,
            enable_debounce: false,
            debounce_minutes: 5,
            tick_interval: Duration::from_secs(2),
            intake_capacity: 1024,
            shutdown_timeout: Duration::from_secs(30),
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

impl AnalysisConfig {
    /// Minimum spacing between completed analyses, or `None` when debounce is off.
    pub fn debounce_interval(&self) -> Option<Duration> {
        self.enable_debounce
            .then(|| Duration::from_secs(self.debounce_minutes * 60))
    }

    fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = AnalysisConfig {
            min_new_feedbacks_for_analysis: env_or(
                "ANALYSIS_MIN_NEW_FEEDBACKS",
                defaults.min_new_feedbacks_for_analysis,
            )?,
            max_feedbacks_in_context: env_or(
                "ANALYSIS_MAX_FEEDBACKS_IN_CONTEXT",
                defaults.max_feedbacks_in_context,
            )?,
            max_tokens_per_request: env_or(
                "ANALYSIS_MAX_TOKENS_PER_REQUEST",
                defaults.max_tokens_per_request,
            )?,
            enable_debounce: env_or("ANALYSIS_ENABLE_DEBOUNCE", defaults.enable_debounce)?,
            debounce_minutes: env_or("ANALYSIS_DEBOUNCE_MINUTES", defaults.debounce_minutes)?,
            tick_interval: Duration::from_secs(env_or(
                "ANALYSIS_TICK_INTERVAL_SECS",
                defaults.tick_interval.as_secs(),
            )?),
            intake_capacity: env_or("ANALYSIS_INTAKE_CAPACITY", defaults.intake_capacity)?,
            shutdown_timeout: Duration::from_secs(env_or(
                "ANALYSIS_SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout.as_secs(),
            )?),
            model: std::env::var("LLM_MODEL").unwrap_or(defaults.model),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would spin the tick loop or make every tick a no-op.
    fn validate(&self) -> Result<()> {
        ensure!(
            !self.tick_interval.is_zero(),
            "ANALYSIS_TICK_INTERVAL_SECS must be at least 1"
        );
        ensure!(
            self.max_feedbacks_in_context > 0,
            "ANALYSIS_MAX_FEEDBACKS_IN_CONTEXT must be at least 1"
        );
        ensure!(
            self.max_tokens_per_request > 0,
            "ANALYSIS_MAX_TOKENS_PER_REQUEST must be at least 1"
        );
        ensure!(
            self.intake_capacity > 0,
            "ANALYSIS_INTAKE_CAPACITY must be at least 1"
        );
        Ok(())
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            analysis: AnalysisConfig::from_env()?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("Environment variable '{key}' has invalid value '{raw}'"))
}
