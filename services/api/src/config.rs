use panel_service::config::{Config as PanelConfig, ConfigError};
use std::net::SocketAddr;

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub panel: PanelConfig,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// This function will look for a `.env` file in the current directory.
    /// Besides the panel variables read by the console service it reads:
    ///
    /// *   `BIND_ADDRESS`: The address and port to bind the server to. Defaults to "0.0.0.0:3000".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_address_str = lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        Ok(Self {
            bind_address,
            panel: PanelConfig::from_lookup(lookup)?,
        })
    }
}
