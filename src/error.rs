use std::fmt;

use thiserror::Error;

/// Library error type for asset loading operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Every attempt to fetch an asset failed.
    #[error("fetch of {locator} failed after {attempts} attempts: {last}")]
    FetchExhausted {
        locator: String,
        attempts: u32,
        last: String,
    },

    /// The fetch was cancelled before it resolved.
    #[error("fetch of {0} cancelled")]
    FetchCancelled(String),

    /// The fetch task died before producing a result.
    #[error("fetch of {locator} aborted: {reason}")]
    FetchAborted { locator: String, reason: String },

    /// Ciphertext could not be turned back into plaintext.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// A display handle could not be materialized from plaintext.
    #[error("display handle creation failed: {0}")]
    HandleCreation(String),

    /// The gallery manifest is malformed or inconsistent.
    #[error("invalid manifest: {0}")]
    Manifest(String),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// YAML/serde configuration error.
    #[error(transparent)]
    Config(#[from] serde_yaml::Error),

    /// JSON manifest error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Terminal failure recorded on an asset until it is explicitly re-armed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadFailure {
    FetchExhausted(String),
    FetchAborted(String),
    Decryption(String),
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FetchExhausted(msg) => write!(f, "fetch exhausted: {msg}"),
            Self::FetchAborted(msg) => write!(f, "fetch aborted: {msg}"),
            Self::Decryption(msg) => write!(f, "decryption failed: {msg}"),
        }
    }
}
