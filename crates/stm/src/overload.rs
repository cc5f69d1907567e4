//! Backpressure callbacks for version-map chain growth
//!
//! When the chain outgrows the configured thresholds the committing caller
//! is told to wait via a pluggable handler, instead of the engine growing
//! memory without bound or failing the commit. Admission control, not an
//! error.

use crate::branch::Branch;

/// Callbacks invoked by the commit path when the chain length crosses the
/// branch's configured thresholds. Handlers may block the committing
/// thread to apply backpressure.
pub trait OverloadHandler: Send + Sync {
    /// The chain reached the soft threshold
    fn on_map_queue_threshold_reached(&self, branch: &Branch);

    /// The chain reached the maximum. `first_notification` is true only
    /// for the first crossing since the chain last drained.
    fn on_map_queue_maximum_reached(&self, branch: &Branch, first_notification: bool);
}

/// Default handler: logs and lets the commit proceed.
#[derive(Debug, Default)]
pub struct LogOverloadHandler;

impl OverloadHandler for LogOverloadHandler {
    fn on_map_queue_threshold_reached(&self, branch: &Branch) {
        tracing::debug!(branch = %branch.id(), "version map queue reached threshold");
    }

    fn on_map_queue_maximum_reached(&self, branch: &Branch, first_notification: bool) {
        if first_notification {
            tracing::warn!(branch = %branch.id(), "version map queue reached maximum");
        }
    }
}
