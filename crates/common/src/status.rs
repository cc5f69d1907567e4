//! Commit outcomes and conflict-detection policy

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire-visible result of a commit or propagation attempt.
///
/// Internal CAS races never surface here; they are retried transparently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitStatus {
    /// The transaction's map was published into the snapshot chain
    Success,
    /// A concurrent writer invalidated the transaction; the caller decides
    /// whether to re-run the transaction body
    Conflict,
    /// The branch (or its connection source) is permanently disconnected;
    /// this attempt cannot be retried
    Abort,
}

impl CommitStatus {
    /// True when the commit published
    pub fn is_success(&self) -> bool {
        matches!(self, CommitStatus::Success)
    }
}

impl fmt::Display for CommitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitStatus::Success => write!(f, "success"),
            CommitStatus::Conflict => write!(f, "conflict"),
            CommitStatus::Abort => write!(f, "abort"),
        }
    }
}

/// How commit validation detects conflicts between concurrent transactions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictPolicy {
    /// Full validation: a transaction conflicts with any map published
    /// since its start whose writes intersect the transaction's read set.
    #[default]
    ReadWriteConflicts,
    /// Cheaper validation: two write sets conflict iff their key sets
    /// intersect; reads are not validated. Suitable for blind-write
    /// workloads that tolerate stale reads.
    WriteWriteConflicts,
}
