//! Scriptable in-memory transport.
//!
//! Enabled for this crate's own tests and, through the `mock` feature, for
//! downstream crates that drive an [`LxdClient`](crate::LxdClient) without
//! a daemon.
//!
//! ```ignore
//! let transport = MockTransport::new(|request| {
//!     if request.path.ends_with("/state") {
//!         MockReply::ok(r#"{"metadata": {"status": "Running"}}"#)
//!     } else {
//!         MockReply::not_found()
//!     }
//! });
//! ```

use crate::error::{ApiError, Result};
use crate::transport::{ApiRequest, Method, RawReply, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Mutex, PoisonError};

/// Body of the reply the daemon sends for an unknown object.
pub const NOT_FOUND_BODY: &str =
    r#"{"error": "not found", "error_code": 404, "type": "error", "metadata": {}}"#;

/// What the mock does with one request.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Answer with the given HTTP status and body.
    Reply {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },
    /// Never answer.
    Pending,
    /// Fail as if the socket refused the connection.
    ConnectionRefused(String),
}

impl MockReply {
    /// `200 OK` with `body`.
    pub fn ok(body: impl Into<String>) -> Self {
        Self::Reply {
            status: 200,
            body: body.into(),
        }
    }

    /// Arbitrary status with `body`.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Reply {
            status,
            body: body.into(),
        }
    }

    /// `404` with the daemon's not-found envelope.
    pub fn not_found() -> Self {
        Self::status(404, NOT_FOUND_BODY)
    }
}

type Handler = dyn Fn(&ApiRequest) -> MockReply + Send + Sync;

/// A [`Transport`] answering from a closure and recording every request.
pub struct MockTransport {
    handler: Box<Handler>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    /// Create a transport that answers each request with `handler`.
    pub fn new(handler: impl Fn(&ApiRequest) -> MockReply + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// All requests received so far, oldest first.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of requests with `method` whose path contains `fragment`.
    pub fn count(&self, method: &Method, fragment: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.method == *method && r.path.contains(fragment))
            .count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &ApiRequest) -> Result<RawReply> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        match (self.handler)(request) {
            MockReply::Reply { status, body } => Ok(RawReply {
                status,
                body: Bytes::from(body),
            }),
            MockReply::Pending => std::future::pending().await,
            MockReply::ConnectionRefused(reason) => Err(ApiError::Connection {
                url: request.url.clone(),
                reason,
            }),
        }
    }
}
