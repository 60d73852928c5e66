//! State persistence hook.

use crate::state::InstanceState;

/// Receives instance state transitions so they can be recorded outside the
/// backend.
///
/// Called after a successful start and after a successful shutdown. Never
/// called while tearing an instance down.
pub trait StatusMonitor: Send + Sync {
    /// Record that `name` is now in `state`.
    fn persist_state_for(&self, name: &str, state: InstanceState);
}

/// A monitor that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMonitor;

impl StatusMonitor for NoopMonitor {
    fn persist_state_for(&self, name: &str, state: InstanceState) {
        tracing::trace!(instance = %name, %state, "State change not persisted");
    }
}
