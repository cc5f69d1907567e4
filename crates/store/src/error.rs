//! Error types for backing stores

use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in a backing store
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("record encoding error: {0}")]
    Encoding(String),
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Backend(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Backend(s)
    }
}
