// ABOUTME: Error taxonomy for the bridge, one thiserror enum per subsystem
// ABOUTME: plus a top-level enum the CLI uses to pick an exit code

use std::io;
use thiserror::Error;

/// Configuration file failed to parse or failed validation. Fatal at
/// startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("couldn't read settings file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid settings JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid host '{0}': not empty and not a valid IP address")]
    InvalidHost(String),

    #[error("ssl enabled but private key path is empty or unreadable: {0}")]
    UnreadablePrivateKey(String),

    #[error("ssl enabled but certificate path is empty or unreadable: {0}")]
    UnreadableCertificate(String),

    #[error("auth enabled but auth_key is empty")]
    EmptyAuthKey,

    #[error("invalid synctime '{0}', expected 'hh:mm'")]
    InvalidSynctime(String),
}

/// Errors from the serial transport.
#[derive(Debug, Error)]
pub enum SerialError {
    #[error("no usable serial port found")]
    NoPort,

    #[error("serial I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serial port error: {0}")]
    Port(#[from] serialport::Error),
}

/// Errors scoped to a single TCP client; never propagate past that client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("client authorisation failed")]
    AuthFailed,

    #[error("TLS error: {0}")]
    Tls(#[from] tokio_rustls::rustls::Error),
}

/// Referencing an identifier that the packet cache does not hold (already
/// deleted, or never inserted).
#[derive(Debug, Error)]
#[error("no cached frame for id {0}")]
pub struct CacheMiss(pub uuid::Uuid);

/// Writer queue saturated; the caller should drop the frame and warn, not
/// treat this as fatal.
#[derive(Debug, Error)]
#[error("serial writer queue is full")]
pub struct QueueFull;

/// A network listener couldn't bind; retried on a timer rather than fatal.
#[derive(Debug, Error)]
#[error("couldn't bind listener on {addr}: {source}")]
pub struct ListenerBindError {
    pub addr: String,
    #[source]
    pub source: io::Error,
}

/// Top-level error used by `main` to decide the process exit code.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Serial(#[from] SerialError),

    #[error(transparent)]
    ListenerBind(#[from] ListenerBindError),

    #[error(transparent)]
    Network(#[from] ClientError),
}
