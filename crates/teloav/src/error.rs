//! Error types for TelOAV discovery

use std::borrow::Cow;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Discovery error type
///
/// Everything here aborts at most the current cycle. Per-endpoint and
/// per-node failures never surface as a `DiscoveryError`; they are folded
/// into `DiscoveryStatus` or skipped by the walker.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing 'endpoint' for input type '{kind}' (block {index})")]
    MissingEndpoint { kind: String, index: usize },

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Failed to write {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Errors raised by a remote client capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Could not establish (or lost) the connection to the server
    #[error("Connection error: {0}")]
    Connection(String),

    /// A single request was rejected or failed
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected client error: {0}")]
    Unexpected(String),
}

impl ClientError {
    /// Whether this error means the endpoint was unreachable.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, ClientError::Connection(_) | ClientError::Timeout(_))
    }

    /// The message the transport reported, without the variant prefix.
    pub fn detail(&self) -> Cow<'_, str> {
        match self {
            ClientError::Connection(msg)
            | ClientError::Request(msg)
            | ClientError::Unexpected(msg) => Cow::Borrowed(msg.as_str()),
            ClientError::Timeout(limit) => Cow::Owned(format!("timed out after {:?}", limit)),
        }
    }
}
