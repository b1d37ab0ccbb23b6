//! Error types shared across the service.
//!
//! Unknown or malformed requests are not errors here: they are answered
//! in-band by the dispatcher and never leave the protocol layer.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures at the session boundary.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Read or write on the transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    /// An operation was attempted after the session was torn down.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Record store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("record store is poisoned")]
    Poisoned,
}

/// Analytics failures.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("insufficient data: need at least {required} records, have {available}")]
    InsufficientData { required: usize, available: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid listen address '{0}'")]
    InvalidListen(String),
}

/// Client engine failures.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to resolve '{target}': {source}")]
    Resolve {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error("no address of '{0}' accepted the connection")]
    Connect(String),
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    #[error("client is closed")]
    Closed,
}
