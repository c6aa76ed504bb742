mod logging;
mod server;


pub use logging::*;
pub use server::*;

use std::path::Path;

use courier_broker::BrokerConfig;
use courier_smtp::SmtpConfig;
use serde::Deserialize;

use crate::error::ServerError;

/// Top-level configuration for the Courier server, loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct CourierConfig {
    /// HTTP server bind configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Outbound SMTP relay used by every consumer.
    #[serde(default)]
    pub smtp: SmtpConfig,
    /// Broker backend and consumer concurrency.
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Log level and output format.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CourierConfig {
    /// Load configuration from `path`, or use defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let contents = if path.exists() {
            std::fs::read_to_string(path)?
        } else {
            String::new()
        };
        Self::parse(&contents)
            .map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}
