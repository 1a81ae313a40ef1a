// ABOUTME: One TCP endpoint's configuration: bind address, relay/auth/TLS flags

use crate::error::ConfigError;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub relay: bool,
    pub ssl: bool,
    pub pk: String,
    pub cert: String,
    pub auth: bool,
    pub auth_key: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        ConnectionSettings {
            host: "0.0.0.0".to_string(),
            port: 27015,
            relay: true,
            ssl: false,
            pk: String::new(),
            cert: String::new(),
            auth: false,
            auth_key: String::new(),
        }
    }
}

impl ConnectionSettings {
    /// Validates the settings in place: `host` empty or a valid IP; `ssl`
    /// requires readable `pk`/`cert`; `auth` requires a non-empty
    /// `auth_key`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.host.is_empty() && self.host.parse::<IpAddr>().is_err() {
            return Err(ConfigError::InvalidHost(self.host.clone()));
        }

        if self.ssl {
            if self.pk.is_empty() || !Path::new(&self.pk).is_file() {
                return Err(ConfigError::UnreadablePrivateKey(self.pk.clone()));
            }
            if self.cert.is_empty() || !Path::new(&self.cert).is_file() {
                return Err(ConfigError::UnreadableCertificate(self.cert.clone()));
            }
        }

        if self.auth && self.auth_key.is_empty() {
            return Err(ConfigError::EmptyAuthKey);
        }

        Ok(())
    }

    /// The socket address to bind, defaulting the empty host to "all
    /// interfaces" (`0.0.0.0`/`INADDR_ANY` via an unspecified IPv4 host).
    pub fn bind_host(&self) -> &str {
        if self.host.is_empty() {
            "0.0.0.0"
        } else {
            &self.host
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_host_is_valid() {
        let s = ConnectionSettings {
            host: String::new(),
            ..Default::default()
        };
        assert!(s.validate().is_ok());
    }

    #[test]
    fn garbage_host_is_rejected() {
        let s = ConnectionSettings {
            host: "not-an-ip".to_string(),
            ..Default::default()
        };
        assert!(matches!(s.validate(), Err(ConfigError::InvalidHost(_))));
    }

    #[test]
    fn ssl_without_cert_is_rejected() {
        let s = ConnectionSettings {
            ssl: true,
            ..Default::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn auth_without_key_is_rejected() {
        let s = ConnectionSettings {
            auth: true,
            ..Default::default()
        };
        assert!(matches!(s.validate(), Err(ConfigError::EmptyAuthKey)));
    }
}
