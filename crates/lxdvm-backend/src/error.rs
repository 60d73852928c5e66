//! Error types for lxdvm-backend.

use crate::state::InstanceState;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for lxdvm-backend operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur during instance lifecycle operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Error from lxdvm-api
    #[error(transparent)]
    Api(#[from] lxdvm_api::ApiError),

    /// The instance went away while it was being started
    #[error("{message}")]
    Start {
        /// Instance name
        name: String,
        /// Reason shown to the caller
        message: String,
    },

    /// The requested transition is not possible from the current state
    #[error("{0}")]
    InvalidState(String),

    /// The backend does not implement the operation
    #[error("{0} is currently not supported")]
    Unsupported(&'static str),

    /// No management address appeared in time
    #[error("failed to determine IP address for {name} within {timeout:?}")]
    AddressTimeout {
        /// Instance name
        name: String,
        /// How long the address was polled for
        timeout: Duration,
    },

    /// Stop finished but the instance did not reach `stopped`
    #[error("{name} did not stop, current state is {state}")]
    Shutdown {
        /// Instance name
        name: String,
        /// State observed after the stop
        state: InstanceState,
    },

    /// The daemon does not trust this client
    #[error("Failed to authenticate to LXD.")]
    Authentication,

    /// The daemon socket cannot be reached
    #[error("{reason}\n\nPlease ensure the LXD daemon is installed and running, and that {socket} is accessible.")]
    Unreachable {
        /// Socket path that was tried
        socket: String,
        /// Underlying connection error
        reason: String,
    },

    /// A cloud-init document could not be rendered
    #[error("cloud-init document error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CoreError {
    /// Whether this is the distinguished start failure that callers may
    /// retry or report separately.
    pub fn is_start_failure(&self) -> bool {
        matches!(self, Self::Start { .. })
    }

    /// Whether the underlying request reported a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api(e) if e.is_not_found())
    }
}
