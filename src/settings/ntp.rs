// ABOUTME: NTP broadcaster configuration: whether it's enabled and an optional
// ABOUTME: fixed daily sync time

use crate::error::ConfigError;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NtpSettings {
    pub enabled: bool,
    pub synctime: String,
}

impl NtpSettings {
    /// Validates `synctime`, if set, matches `hh:mm` with `0 <= hh <= 23`
    /// and `0 <= mm <= 59`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.synctime.is_empty() {
            return Ok(());
        }

        let invalid = || ConfigError::InvalidSynctime(self.synctime.clone());

        let mut parts = self.synctime.split(':');
        let hh = parts.next().ok_or_else(invalid)?;
        let mm = parts.next().ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }

        let hh: u32 = hh.parse().map_err(|_| invalid())?;
        let mm: u32 = mm.parse().map_err(|_| invalid())?;
        if hh > 23 || mm > 59 {
            return Err(invalid());
        }

        Ok(())
    }

    /// Parses `synctime` into `(hour, minute)`, if set.
    pub fn parsed_synctime(&self) -> Option<(u32, u32)> {
        if self.synctime.is_empty() {
            return None;
        }
        let mut parts = self.synctime.split(':');
        let hh: u32 = parts.next()?.parse().ok()?;
        let mm: u32 = parts.next()?.parse().ok()?;
        Some((hh, mm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_synctime_is_valid() {
        assert!(NtpSettings::default().validate().is_ok());
    }

    #[test]
    fn well_formed_synctime_is_valid() {
        let s = NtpSettings {
            enabled: true,
            synctime: "08:30".to_string(),
        };
        assert!(s.validate().is_ok());
        assert_eq!(s.parsed_synctime(), Some((8, 30)));
    }

    #[test]
    fn out_of_range_hour_is_rejected() {
        let s = NtpSettings {
            enabled: true,
            synctime: "24:00".to_string(),
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn malformed_synctime_is_rejected() {
        let s = NtpSettings {
            enabled: true,
            synctime: "not-a-time".to_string(),
        };
        assert!(s.validate().is_err());
    }
}
