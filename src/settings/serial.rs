// ABOUTME: Serial port configuration: an explicit port string, or autodiscovery
// ABOUTME: by USB vendor/product ID allow-list

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub port: String,
    pub autodiscover: bool,
}

impl Default for SerialSettings {
    fn default() -> Self {
        SerialSettings {
            port: String::new(),
            autodiscover: true,
        }
    }
}
