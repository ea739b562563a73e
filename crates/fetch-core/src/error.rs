//! Error types for the fetch cache

use std::io;

use thiserror::Error;

/// Errors reported by an origin
#[derive(Error, Debug)]
pub enum OriginError {
    /// The origin has no object under this name
    #[error("not found in origin: {0}")]
    NotFound(String),

    /// Local I/O failure while talking to the origin
    #[error("origin I/O error: {0}")]
    Io(#[from] io::Error),

    /// Remote failure (network, service error, malformed response)
    #[error("origin request failed: {0}")]
    Remote(String),
}

impl OriginError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, OriginError::NotFound(_))
    }
}

/// Errors returned from `open`
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("invalid cache key {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error(transparent)]
    Origin(#[from] OriginError),

    #[error("{name}: {size} bytes cannot fit in a cache of {capacity} bytes")]
    CapacityUnsatisfiable {
        name: String,
        size: u64,
        capacity: u64,
    },

    #[error("{name}: origin declared {declared} bytes but sent {actual}")]
    SizeMismatch {
        name: String,
        declared: u64,
        actual: u64,
    },

    #[error("local storage error for {name}: {source}")]
    Storage {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("cache request timed out")]
    Timeout,

    #[error("cache is shutting down")]
    Shutdown,
}

impl CacheError {
    pub fn storage(name: &str, source: io::Error) -> Self {
        CacheError::Storage {
            name: name.to_string(),
            source,
        }
    }

    /// True when the origin has no such object
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::Origin(e) if e.is_not_found())
    }
}
