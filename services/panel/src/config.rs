//! Application Configuration Module
//!
//! This module centralizes the configuration for the panel runtimes.
//! It loads settings from environment variables and provides a single,
//! shareable struct that both the console driver and the gateway build from.

use panel_core::config::PanelTiming;
use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// Default Ollama endpoint for a local install.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
/// Model pulled by the local setup instructions.
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2:3b";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleProvider {
    Ollama,
    OpenAI,
}

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub provider: OracleProvider,
    pub ollama_url: String,
    pub openai_api_key: Option<SecretString>,
    pub oracle_model: String,
    pub oracle_timeout: Duration,
    pub persistence_url: Option<String>,
    pub persistence_token: Option<SecretString>,
    pub user_id: String,
    pub seed: Option<u64>,
    pub timing: PanelTiming,
    pub prompts_dir: PathBuf,
    pub log_level: Level,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `ORACLE_PROVIDER`: "ollama" or "openai". Defaults to "ollama".
    // *   `OLLAMA_URL`: Base URL of the Ollama server. Defaults to http://localhost:11434.
    // *   `OPENAI_API_KEY`: Required if provider is "openai".
    // *   `ORACLE_MODEL`: (Optional) Defaults to "llama3.2:3b" for ollama and "gpt-4o" for openai.
    // *   `ORACLE_TIMEOUT_SECS`: (Optional) Request timeout. Defaults to 60.
    // *   `PERSISTENCE_URL` / `PERSISTENCE_TOKEN`: (Optional) Interview API. Unset disables saving.
    // *   `PANEL_USER_ID`: (Optional) Defaults to "anonymous".
    // *   `PANEL_SEED`: (Optional) Fixed seed for turn selection and interruptions.
    // *   `SETTLE_DELAY_MS`, `INTERRUPT_COOLDOWN_MS`, `TICK_INTERVAL_MS`: (Optional) Timing.
    // *   `PROMPTS_DIR`: (Optional) Directory of prompt overrides. Defaults to "prompts".
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. This is useful for local development and is ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider_str = var("ORACLE_PROVIDER").unwrap_or_else(|| "ollama".to_string());
        let provider = match provider_str.to_lowercase().as_str() {
            "ollama" => OracleProvider::Ollama,
            "openai" => OracleProvider::OpenAI,
            other => {
                return Err(ConfigError::InvalidValue(
                    "ORACLE_PROVIDER".to_string(),
                    format!("'{other}' is not one of: ollama, openai"),
                ));
            }
        };

        let openai_api_key = var("OPENAI_API_KEY").map(SecretString::from);
        if provider == OracleProvider::OpenAI && openai_api_key.is_none() {
            return Err(ConfigError::MissingVar(
                "OPENAI_API_KEY must be set for 'openai' provider".to_string(),
            ));
        }

        let oracle_model = var("ORACLE_MODEL").unwrap_or_else(|| {
            match provider {
                OracleProvider::Ollama => DEFAULT_OLLAMA_MODEL,
                OracleProvider::OpenAI => DEFAULT_OPENAI_MODEL,
            }
            .to_string()
        });

        let number = |key: &str, default: u64| -> Result<u64, ConfigError> {
            match var(key) {
                Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                    ConfigError::InvalidValue(key.to_string(), format!("'{raw}': {e}"))
                }),
                None => Ok(default),
            }
        };

        let defaults = PanelTiming::default();
        let timing = PanelTiming {
            settle_delay: Duration::from_millis(number(
                "SETTLE_DELAY_MS",
                defaults.settle_delay.as_millis() as u64,
            )?),
            interrupt_cooldown: Duration::from_millis(number(
                "INTERRUPT_COOLDOWN_MS",
                defaults.interrupt_cooldown.as_millis() as u64,
            )?),
            tick_interval: Duration::from_millis(number(
                "TICK_INTERVAL_MS",
                defaults.tick_interval.as_millis() as u64,
            )?),
            ..defaults
        };
        if timing.tick_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "TICK_INTERVAL_MS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let seed = match var("PANEL_SEED") {
            Some(_) => Some(number("PANEL_SEED", 0)?),
            None => None,
        };

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            provider,
            ollama_url: var("OLLAMA_URL").unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            openai_api_key,
            oracle_model,
            oracle_timeout: Duration::from_secs(number("ORACLE_TIMEOUT_SECS", 60)?),
            persistence_url: var("PERSISTENCE_URL"),
            persistence_token: var("PERSISTENCE_TOKEN").map(SecretString::from),
            user_id: var("PANEL_USER_ID").unwrap_or_else(|| "anonymous".to_string()),
            seed,
            timing,
            prompts_dir: PathBuf::from(var("PROMPTS_DIR").unwrap_or_else(|| "prompts".to_string())),
            log_level,
        })
    }
}
