//! Error types for the engine core
//!
//! Conflicts and aborts are commit *statuses*, not errors; see
//! `weft_common::CommitStatus`. The variants here cover misuse of the API
//! surface and failures of external collaborators. Invariant violations
//! (watcher underflow, snapshot index corruption) are not represented:
//! those panic, because masking them risks silent data corruption.

use thiserror::Error;
use weft_common::ObjectId;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the engine core
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("object {0} has a different kind than this operation expects")]
    KindMismatch(ObjectId),

    #[error("field index {0} out of range")]
    FieldOutOfRange(u32),

    #[error("list index {0} out of range")]
    IndexOutOfRange(usize),

    #[error("branch is disconnected")]
    BranchDisconnected,

    #[error("branch has been dropped")]
    BranchGone,

    #[error("commit retries exhausted")]
    RetriesExhausted,

    #[error("store error: {0}")]
    Store(#[from] weft_store::Error),

    #[error("record encoding error: {0}")]
    Encoding(String),
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::InvalidOperation(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::InvalidOperation(s)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Encoding(e.to_string())
    }
}
