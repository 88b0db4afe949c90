use std::io;
use std::path::PathBuf;
use std::string::FromUtf8Error;

use thiserror::Error;

/// Failure of a single MLLP exchange. Never escapes the transport as a panic;
/// the batch orchestrator treats any of these as fatal for the batch.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not resolve {endpoint}")]
    Resolve {
        endpoint: String,
        #[source]
        source: Option<io::Error>,
    },

    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("response is not valid UTF-8: {0}")]
    Decode(#[from] FromUtf8Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
