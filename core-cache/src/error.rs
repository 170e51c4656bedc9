//! Error types for the cache engine.

use thiserror::Error;

/// Outcome of a failed fetch, shared by every caller waiting on the key.
///
/// Cloneable because one in-flight fetch resolves many waiters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Transport(String),

    #[error("Request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Not authenticated: {0}")]
    Unauthenticated(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The query cannot be expressed as a request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The fetch task was aborted or panicked before producing a result.
    #[error("Fetch cancelled: {0}")]
    Cancelled(String),

    /// A key was read back as a different payload type than was stored.
    #[error("Cached value for '{key}' has an unexpected type")]
    TypeMismatch { key: String },
}

impl FetchError {
    /// Human-readable message suitable for inline display.
    pub fn message(&self) -> String {
        match self {
            FetchError::Status { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// Network failures and non-2xx statuses are retried; auth, decode and
    /// key-shape failures fail fast.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transport(_) | FetchError::Status { .. })
    }
}

/// Errors raised by cache construction and configuration.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Invalid cache configuration: {0}")]
    Config(#[from] core_runtime::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;
