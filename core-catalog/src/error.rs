use bridge_traits::error::BridgeError;
use core_cache::{CacheError, FetchError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },
}

pub type Result<T> = std::result::Result<T, CatalogError>;

impl CatalogError {
    pub fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Maps a transport-level failure onto the cache's error taxonomy.
pub(crate) fn fetch_error_from_bridge(err: BridgeError) -> FetchError {
    match err {
        BridgeError::Unauthenticated(message) => FetchError::Unauthenticated(message),
        other => FetchError::Transport(other.to_string()),
    }
}

impl From<CatalogError> for FetchError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Fetch(err) => err,
            CatalogError::Bridge(err) => fetch_error_from_bridge(err),
            CatalogError::Cache(CacheError::Fetch(err)) => err,
            CatalogError::Cache(err) => FetchError::InvalidRequest(err.to_string()),
            CatalogError::InvalidInput { field, message } => {
                FetchError::InvalidRequest(format!("{}: {}", field, message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthenticated_bridge_error_maps_to_signal() {
        let err = fetch_error_from_bridge(BridgeError::Unauthenticated("no session".into()));
        assert_eq!(err, FetchError::Unauthenticated("no session".into()));
    }

    #[test]
    fn test_timeout_maps_to_transport() {
        let err: FetchError = CatalogError::Bridge(BridgeError::Timeout(30_000)).into();
        assert!(matches!(err, FetchError::Transport(message) if message.contains("30000")));
    }

    #[test]
    fn test_invalid_input_maps_to_invalid_request() {
        let err: FetchError = CatalogError::invalid_input("page", "out of range").into();
        assert_eq!(err, FetchError::InvalidRequest("page: out of range".into()));
        assert!(!err.is_transient());
    }
}
