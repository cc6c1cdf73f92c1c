//! Unified error types for the update engine.
//!
//! Everything that can go wrong during a tick funnels into [`UpdateError`].
//! Only configuration errors are fatal; the engine logs the rest and waits
//! for the next tick.

use std::io;
use thiserror::Error;

/// Unified error type for update operations.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// IO error (file read/write, subprocess)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-200 status
    #[error("unexpected status {status} reading {url}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    /// Hex decoding error (malformed manifest.hash)
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    /// The tree's computed digest disagrees with its manifest.hash sidecar
    #[error("manifest content and hash are inconsistent")]
    ManifestInconsistent,

    /// A parsed manifest names a path the engine refuses to touch
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// The before-sync fence timed out waiting for services to stop
    #[error("services not stopping: {0}")]
    ServiceNotStopping(String),

    /// The mirror collaborator reported a hard failure
    #[error("mirror failed: {0}")]
    Mirror(String),

    /// Invalid configuration (fatal at startup)
    #[error("config error: {0}")]
    Config(String),
}

impl UpdateError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for a 404, which on a hash probe just means no release is
    /// published yet.
    pub fn is_routine_missing(&self) -> bool {
        matches!(
            self,
            UpdateError::HttpStatus { status, .. } if *status == reqwest::StatusCode::NOT_FOUND
        )
    }
}

/// Result type alias for update operations
pub type UpdateResult<T> = Result<T, UpdateError>;
