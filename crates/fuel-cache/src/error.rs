//! Cache error types.

use fuel_transport::FetchError;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache operation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// Backend storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// The network fetch behind a cache miss failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A cached or fetched value did not have the expected shape.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CacheError {
    /// The underlying fetch error, if this came from the network.
    pub fn as_fetch(&self) -> Option<&FetchError> {
        match self {
            Self::Fetch(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
