// ABOUTME: Logging verbosity and output sink configuration, plus process-wide
// ABOUTME: subscriber setup: a formatted stream, or syslog via the log facade

use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Debug,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stream,
    Syslog,
}

impl Default for LogOutput {
    fn default() -> Self {
        LogOutput::Stream
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    #[serde(rename = "type")]
    pub level: LogLevel,
    pub output: LogOutput,
}

impl LoggingSettings {
    fn filter(&self) -> EnvFilter {
        let default = match self.level {
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    }

    /// Installs the process-wide subscriber. Idempotent only in the sense
    /// that the process calls it exactly once, at startup, before any
    /// other component logs anything.
    pub fn init(&self) {
        match self.output {
            LogOutput::Stream => {
                tracing_subscriber::fmt().with_env_filter(self.filter()).init();
            }
            LogOutput::Syslog => {
                let formatter = syslog::Formatter3164 {
                    facility: syslog::Facility::LOG_DAEMON,
                    hostname: None,
                    process: "velbus-bridge".into(),
                    pid: std::process::id(),
                };
                match syslog::unix(formatter) {
                    Ok(logger) => {
                        let max_level = match self.level {
                            LogLevel::Info => log::LevelFilter::Info,
                            LogLevel::Debug => log::LevelFilter::Debug,
                        };
                        log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
                            .map(|()| log::set_max_level(max_level))
                            .expect("logger already installed");
                        tracing_log::LogTracer::init().expect("log tracer already installed");
                    }
                    Err(err) => {
                        // Fall back to the stream so the process still logs
                        // something if the syslog socket is unavailable.
                        tracing_subscriber::fmt().with_env_filter(self.filter()).init();
                        tracing::warn!(%err, "couldn't connect to syslog, logging to stream instead");
                    }
                }
            }
        }
    }
}
