//! Common types for the weft transactional memory engine
//!
//! This crate defines:
//! - Object, field and version-map identities
//! - Version-map origin tags (local vs. replicated vs. imported)
//! - Commit status and conflict-detection policy
//! - The universal `Value` type stored by transactional objects

mod ids;
mod source;
mod status;
mod value;

pub use ids::FieldId;
pub use ids::MapId;
pub use ids::ObjectId;
pub use source::Source;
pub use status::CommitStatus;
pub use status::ConflictPolicy;
pub use value::Key;
pub use value::Value;
