// ABOUTME: Top-level settings: loads and validates the JSON configuration file,
// ABOUTME: falling back to documented defaults for anything left unspecified

mod logging;
mod network;
mod ntp;
mod serial;

pub use logging::{LogLevel, LogOutput, LoggingSettings};
pub use network::ConnectionSettings;
pub use ntp::NtpSettings;
pub use serial::SerialSettings;

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub serial: SerialSettings,
    pub connections: Vec<ConnectionSettings>,
    pub ntp: NtpSettings,
    pub logging: LoggingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings::defaults()
    }
}

impl Settings {
    /// Default settings: a single plain, unauthenticated, relaying
    /// connection on `0.0.0.0:27015`, autodiscovered serial, NTP disabled.
    pub fn defaults() -> Self {
        Settings {
            serial: SerialSettings::default(),
            connections: vec![ConnectionSettings::default()],
            ntp: NtpSettings::default(),
            logging: LoggingSettings::default(),
        }
    }

    /// Reads, parses and validates settings from a JSON file.
    pub fn load(path: &Path) -> Result<Settings, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let settings: Settings = serde_json::from_str(&text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for connection in &self.connections {
            connection.validate()?;
        }
        self.ntp.validate()?;
        Ok(())
    }
}
