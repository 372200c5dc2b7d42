//! Error types for the watchdog core.
//!
//! Everything raised inside a supervised loop is one of these and is handled
//! within the iteration that produced it. `anyhow` only appears at the binary
//! edge.

use std::path::PathBuf;

use thiserror::Error;

/// Configuration validation and loading failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("device IP address is missing")]
    MissingIp,

    #[error("watched folder path is missing")]
    MissingFolderPath,

    #[error("both device IP address and watched folder path are empty")]
    EmptyArguments,

    #[error("device IP address {0:?} is not a valid IPv4 address")]
    InvalidIp(String),

    #[error("invalid configuration: both delivery modes (alfadriver, cr) are enabled")]
    InvalidConfiguration,

    #[error("invalid watch settings: {0}")]
    InvalidWatchSettings(String),

    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures of a single upload attempt that are not a delivery outcome.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("both delivery modes are active; fix the configuration to resume uploads")]
    MultipleModesActive,

    #[error("failed to read {path}: {source}")]
    ReadCandidate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to mark {path} as processed (delivered: {delivered}): {source}")]
    MarkProcessed {
        path: PathBuf,
        delivered: bool,
        #[source]
        source: std::io::Error,
    },
}

/// Why a request to the device control plane did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("device responded with HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Transport(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("supervisor already started")]
    AlreadyStarted,
}
