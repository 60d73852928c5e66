//! Instance lifecycle states and their mapping from LXD status values.

use serde::Serialize;

/// Believed state of a managed instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Not running; also the state of a freshly described instance
    #[default]
    Stopped,
    /// Start issued, not yet confirmed running
    Starting,
    /// Running
    Running,
    /// Being frozen
    Suspending,
    /// Frozen
    Suspended,
    /// Remote state unreadable or unexpected
    Unknown,
}

impl InstanceState {
    /// Map an LXD instance status to a state.
    ///
    /// `status` is the textual status (`Running`, `Frozen`, ...). When it is
    /// empty the numeric `status_code` is used instead. Returns `None` for
    /// values this backend does not know about.
    pub fn from_lxd(status: &str, status_code: i64) -> Option<Self> {
        let state = match status {
            "Running" | "Started" | "Stopping" | "Thawed" => Self::Running,
            "Stopped" => Self::Stopped,
            "Starting" => Self::Starting,
            "Freezing" => Self::Suspending,
            "Frozen" => Self::Suspended,
            "Cancelling" | "Aborting" | "Error" => Self::Unknown,
            "" => return Self::from_lxd_code(status_code),
            _ => return None,
        };
        Some(state)
    }

    fn from_lxd_code(status_code: i64) -> Option<Self> {
        let state = match status_code {
            101 | 103 | 107 | 111 => Self::Running,
            102 => Self::Stopped,
            106 => Self::Starting,
            109 => Self::Suspending,
            110 => Self::Suspended,
            104 | 108 | 112 | 400 => Self::Unknown,
            _ => return None,
        };
        Some(state)
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceState::Stopped => write!(f, "stopped"),
            InstanceState::Starting => write!(f, "starting"),
            InstanceState::Running => write!(f, "running"),
            InstanceState::Suspending => write!(f, "suspending"),
            InstanceState::Suspended => write!(f, "suspended"),
            InstanceState::Unknown => write!(f, "unknown"),
        }
    }
}
