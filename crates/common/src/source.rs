//! Origin tags for version maps
//!
//! Every published version map carries the source it came from. Local
//! commits race through validation; replicated and imported batches were
//! already validated by their origin and are spliced into the chain by
//! propagation instead.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Where a version map originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    /// Committed by a transaction on this process
    Local,
    /// Received from a replication peer
    Replicated {
        /// Peer connection identity
        peer: Uuid,
    },
    /// Imported from an external producer (e.g. a loaded data file)
    Imported {
        /// Producer identity
        origin: Uuid,
    },
}

impl Source {
    /// True for maps committed by this process
    pub fn is_local(&self) -> bool {
        matches!(self, Source::Local)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Local => write!(f, "local"),
            Source::Replicated { peer } => write!(f, "replicated({})", peer),
            Source::Imported { origin } => write!(f, "imported({})", origin),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_local() {
        assert!(Source::Local.is_local());
        assert!(!Source::Replicated { peer: Uuid::now_v7() }.is_local());
    }

    #[test]
    fn test_serde_roundtrip() {
        let source = Source::Imported { origin: Uuid::now_v7() };
        let json = serde_json::to_string(&source).unwrap();
        let back: Source = serde_json::from_str(&json).unwrap();
        assert_eq!(source, back);
    }
}
