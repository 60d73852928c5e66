//! Raw request transport to the LXD daemon.
//!
//! The [`Transport`] trait is the seam between the client and the socket:
//! it sends exactly one request and hands back the status and body without
//! interpreting them. [`UnixSocketTransport`] talks HTTP/1.1 over the LXD
//! Unix socket using hyper and hyperlocal.

use crate::error::{ApiError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use hyper::client::Client;
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Request};
use hyperlocal::{UnixClientExt, UnixConnector, Uri};
use std::path::{Path, PathBuf};

pub use hyper::Method;

/// Body attached to a request.
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// JSON document, sent as `application/json`.
    Json(serde_json::Value),
    /// Pre-encoded payload such as a multipart image upload.
    Raw {
        /// Value of the `Content-Type` header (including any boundary)
        content_type: String,
        /// Encoded body
        bytes: Bytes,
    },
}

/// A single request addressed to the daemon.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP verb
    pub method: Method,
    /// Absolute request path including the API version and query,
    /// e.g. `/1.0/networks?recursion=1`
    pub path: String,
    /// Human readable target used in logs and diagnostics
    pub url: String,
    /// Optional body
    pub body: Option<RequestBody>,
}

/// Undecoded reply from the daemon.
#[derive(Debug, Clone)]
pub struct RawReply {
    /// HTTP status code
    pub status: u16,
    /// Full response body
    pub body: Bytes,
}

/// Sends one request and waits for the complete reply.
///
/// Implementations must not retry or re-send: the client may abandon the
/// returned future on timeout, and state-changing requests are not
/// idempotent.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and return the raw reply.
    ///
    /// Returns [`ApiError::Connection`] when the daemon cannot be reached.
    async fn send(&self, request: &ApiRequest) -> Result<RawReply>;
}

/// HTTP over the LXD Unix domain socket.
pub struct UnixSocketTransport {
    socket_path: PathBuf,
    client: Client<UnixConnector, Body>,
}

impl UnixSocketTransport {
    /// Create a transport for the socket at `socket_path`.
    ///
    /// No connection is made until the first request.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            client: Client::unix(),
        }
    }

    /// Path of the daemon socket.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    fn build(&self, request: &ApiRequest) -> Result<Request<Body>> {
        let uri: hyper::Uri = Uri::new(&self.socket_path, &request.path).into();
        let builder = Request::builder().method(request.method.clone()).uri(uri);

        let built = match &request.body {
            Some(RequestBody::Json(value)) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(value)?)),
            Some(RequestBody::Raw {
                content_type,
                bytes,
            }) => builder
                .header(CONTENT_TYPE, content_type.as_str())
                .body(Body::from(bytes.clone())),
            None => builder.body(Body::empty()),
        };

        built.map_err(|e| ApiError::Request(e.to_string()))
    }
}

#[async_trait]
impl Transport for UnixSocketTransport {
    async fn send(&self, request: &ApiRequest) -> Result<RawReply> {
        let http_request = self.build(request)?;

        tracing::trace!(
            verb = %request.method,
            path = %request.path,
            socket = %self.socket_path.display(),
            "Sending request over LXD socket"
        );

        let response =
            self.client
                .request(http_request)
                .await
                .map_err(|e| ApiError::Connection {
                    url: request.url.clone(),
                    reason: e.to_string(),
                })?;

        let status = response.status().as_u16();
        let body = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| ApiError::Connection {
                url: request.url.clone(),
                reason: e.to_string(),
            })?;

        tracing::trace!(status, body_len = body.len(), "Received LXD reply");
        Ok(RawReply { status, body })
    }
}
