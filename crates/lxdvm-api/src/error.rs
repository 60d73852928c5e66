//! Error types for lxdvm-api.

use thiserror::Error;

/// Result type alias for lxdvm-api operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors that can occur while talking to the LXD daemon.
///
/// Every variant is logged where it is detected, so callers only need to
/// wrap or propagate it.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The socket could not be reached (missing, refused, reset)
    #[error("Cannot connect to {url}: {reason}")]
    Connection {
        /// Target URL of the failed request
        url: String,
        /// Underlying transport error text
        reason: String,
    },

    /// No reply arrived within the configured attempts
    #[error("Timeout getting response for {verb} operation on {url}")]
    Timeout {
        /// HTTP verb of the request
        verb: String,
        /// Target URL of the request
        url: String,
    },

    /// The daemon answered with an empty body
    #[error("Empty reply received for {verb} operation on {url}")]
    EmptyReply {
        /// HTTP verb of the request
        verb: String,
        /// Target URL of the request
        url: String,
    },

    /// The reply body is not valid JSON
    #[error("Error parsing JSON response for {url}: {details}\n{payload}")]
    Parse {
        /// Target URL of the request
        url: String,
        /// Parser error text
        details: String,
        /// Offending payload snippet
        payload: String,
    },

    /// The reply is JSON but not an object
    #[error("Invalid LXD response for {url}: {payload}")]
    UnexpectedShape {
        /// Target URL of the request
        url: String,
        /// Offending payload snippet
        payload: String,
    },

    /// The requested object does not exist
    #[error("LXD object not found: {url}")]
    NotFound {
        /// Target URL of the request
        url: String,
    },

    /// The daemon reported a failure for the request
    #[error("Network error for {url}: {code} - {error}")]
    Network {
        /// Target URL of the request
        url: String,
        /// HTTP status or envelope error code
        code: i64,
        /// Error string from the envelope
        error: String,
    },

    /// Waiting on an operation returned a non-zero `error_code`
    #[error("Error waiting on operation: ({code}) {error}")]
    OperationError {
        /// Envelope `error_code`
        code: i64,
        /// Envelope `error`
        error: String,
    },

    /// Waiting on an operation returned a failing `status_code`
    #[error("Failure waiting on operation: ({code}) {status}")]
    OperationFailure {
        /// Envelope `status_code`
        code: i64,
        /// Envelope `status`
        status: String,
    },

    /// The operation itself finished with a failing `status_code`
    #[error("Operation completed with error: ({code}) {err}")]
    OperationCompleted {
        /// Operation metadata `status_code`
        code: i64,
        /// Operation metadata `err`
        err: String,
    },

    /// An envelope passed to the waiter carries no operation id
    #[error("no operation id in LXD reply")]
    MissingOperation,

    /// The request could not be built
    #[error("failed to build request: {0}")]
    Request(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ApiError {
    /// Whether the daemon reported the object as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the socket could not be reached at all.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}
