//! Request/response client for the LXD REST API.
//!
//! The client turns a verb, a path and an optional body into a parsed
//! [`Envelope`]. It owns the timeout policy and the failure diagnostics;
//! every failure is logged here before it is returned.

use crate::envelope::Envelope;
use crate::error::{ApiError, Result};
use crate::transport::{ApiRequest, Method, RawReply, RequestBody, Transport, UnixSocketTransport};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};

/// Default wait for a single reply attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of extra attempts after the first one times out.
pub const DEFAULT_RETRIES: u32 = 3;

/// Longest payload excerpt carried in parse diagnostics.
const PAYLOAD_SNIPPET_LEN: usize = 512;

/// How long the client waits for a reply.
///
/// A request is sent once. If no reply arrives within `attempt_timeout`, the
/// client keeps waiting on the same in-flight request for up to `retries`
/// more windows, but never past `deadline` measured from the first send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPolicy {
    /// Wait per attempt.
    pub attempt_timeout: Duration,
    /// Extra attempts after the first timeout.
    pub retries: u32,
    /// Hard cap on the total wait.
    pub deadline: Duration,
}

impl RequestPolicy {
    /// Policy with a deadline covering every attempt.
    pub fn new(attempt_timeout: Duration, retries: u32) -> Self {
        Self {
            attempt_timeout,
            retries,
            deadline: attempt_timeout.saturating_mul(retries.saturating_add(1)),
        }
    }

    /// A single attempt of `wait`.
    pub fn single(wait: Duration) -> Self {
        Self::new(wait, 0)
    }

    /// Override the total deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_RETRIES)
    }
}

/// Client for one LXD daemon.
///
/// Cheap to clone; clones share the transport.
#[derive(Clone)]
pub struct LxdClient {
    transport: Arc<dyn Transport>,
    base_url: String,
    api_version: String,
    policy: RequestPolicy,
}

impl std::fmt::Debug for LxdClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LxdClient")
            .field("base_url", &self.base_url)
            .field("policy", &self.policy)
            .finish()
    }
}

impl LxdClient {
    /// Create a client sending through `transport`.
    ///
    /// `socket_path` and `api_version` only shape the URLs shown in logs and
    /// the request paths, e.g. `unix:///var/snap/lxd/common/lxd/unix.socket@1.0`.
    pub fn new(
        transport: Arc<dyn Transport>,
        socket_path: impl AsRef<Path>,
        api_version: impl Into<String>,
    ) -> Self {
        let api_version = api_version.into();
        Self {
            transport,
            base_url: format!("unix://{}@{}", socket_path.as_ref().display(), api_version),
            api_version,
            policy: RequestPolicy::default(),
        }
    }

    /// Create a client for the daemon listening on `socket_path`.
    pub fn unix(socket_path: impl AsRef<Path>, api_version: impl Into<String>) -> Self {
        let socket_path = socket_path.as_ref();
        Self::new(
            Arc::new(UnixSocketTransport::new(socket_path)),
            socket_path,
            api_version,
        )
    }

    /// Replace the timeout policy.
    pub fn with_policy(mut self, policy: RequestPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Current timeout policy.
    pub fn policy(&self) -> RequestPolicy {
        self.policy
    }

    /// Base URL used in diagnostics.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Display URL for `path`; an empty path is the API root.
    pub fn url(&self, path: &str) -> String {
        match path.trim_start_matches('/') {
            "" => self.base_url.clone(),
            path => format!("{}/{}", self.base_url, path),
        }
    }

    /// `GET path`.
    pub async fn get(&self, path: &str) -> Result<Envelope> {
        self.request(Method::GET, path, None).await
    }

    /// `POST path` with a JSON body.
    pub async fn post(&self, path: &str, body: Value) -> Result<Envelope> {
        self.request(Method::POST, path, Some(RequestBody::Json(body)))
            .await
    }

    /// `PUT path` with a JSON body.
    pub async fn put(&self, path: &str, body: Value) -> Result<Envelope> {
        self.request(Method::PUT, path, Some(RequestBody::Json(body)))
            .await
    }

    /// Send a request and return the parsed envelope.
    ///
    /// # Errors
    ///
    /// - [`ApiError::Connection`] when the socket cannot be reached
    /// - [`ApiError::Timeout`] when no reply arrives in time
    /// - [`ApiError::EmptyReply`], [`ApiError::Parse`],
    ///   [`ApiError::UnexpectedShape`] for unusable bodies
    /// - [`ApiError::NotFound`] for HTTP 404
    /// - [`ApiError::Network`] for failing HTTP statuses or a non-zero
    ///   `error_code`
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<RequestBody>,
    ) -> Result<Envelope> {
        let request = self.build(method, path, body);
        let envelope = self.exchange(&request, &self.policy).await?;

        if envelope.error_code() != 0 {
            let err = ApiError::Network {
                url: request.url.clone(),
                code: envelope.error_code(),
                error: envelope.error().to_string(),
            };
            tracing::error!(verb = %request.method, url = %request.url, error = %err, "LXD request failed");
            return Err(err);
        }

        Ok(envelope)
    }

    /// Like [`request`](Self::request) but leaves `error_code` to the
    /// caller and uses `policy` instead of the client's own.
    pub(crate) async fn request_unchecked(
        &self,
        method: Method,
        path: &str,
        policy: &RequestPolicy,
    ) -> Result<Envelope> {
        let request = self.build(method, path, None);
        self.exchange(&request, policy).await
    }

    fn build(&self, method: Method, path: &str, body: Option<RequestBody>) -> ApiRequest {
        let path = path.trim_start_matches('/');
        let versioned = match path {
            "" => format!("/{}", self.api_version),
            path => format!("/{}/{}", self.api_version, path),
        };
        ApiRequest {
            method,
            path: versioned,
            url: self.url(path),
            body,
        }
    }

    async fn exchange(&self, request: &ApiRequest, policy: &RequestPolicy) -> Result<Envelope> {
        tracing::trace!(verb = %request.method, url = %request.url, "Sending LXD request");
        let reply = self.await_reply(request, policy).await?;
        self.interpret(request, reply)
    }

    /// Wait for the reply to a request that is sent exactly once.
    async fn await_reply(&self, request: &ApiRequest, policy: &RequestPolicy) -> Result<RawReply> {
        let start = Instant::now();
        let mut in_flight = self.transport.send(request);
        let mut attempts = 0u32;

        loop {
            let remaining = policy.deadline.saturating_sub(start.elapsed());
            let window = policy.attempt_timeout.min(remaining);

            match timeout(window, &mut in_flight).await {
                Ok(Ok(reply)) => return Ok(reply),
                Ok(Err(e)) => {
                    tracing::error!(verb = %request.method, url = %request.url, error = %e, "LXD request failed");
                    return Err(e);
                }
                Err(_) => {
                    attempts += 1;
                    if attempts > policy.retries || start.elapsed() >= policy.deadline {
                        let err = ApiError::Timeout {
                            verb: request.method.to_string(),
                            url: request.url.clone(),
                        };
                        tracing::error!(
                            verb = %request.method,
                            url = %request.url,
                            attempts,
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            error = %err,
                            "LXD request timed out"
                        );
                        return Err(err);
                    }
                    tracing::warn!(
                        verb = %request.method,
                        url = %request.url,
                        attempt = attempts,
                        "No reply from LXD yet, still waiting"
                    );
                }
            }
        }
    }

    fn interpret(&self, request: &ApiRequest, reply: RawReply) -> Result<Envelope> {
        let text = String::from_utf8_lossy(&reply.body);

        if reply.status == 404 {
            tracing::debug!(url = %request.url, "LXD object not found");
            return Err(ApiError::NotFound {
                url: request.url.clone(),
            });
        }

        if text.trim().is_empty() {
            let err = ApiError::EmptyReply {
                verb: request.method.to_string(),
                url: request.url.clone(),
            };
            tracing::error!(verb = %request.method, url = %request.url, error = %err, "LXD request failed");
            return Err(err);
        }

        let parsed = parse_object(&request.url, &text);

        if reply.status >= 400 {
            let (code, error) = match &parsed {
                Ok(envelope) if envelope.error_code() != 0 => {
                    (envelope.error_code(), envelope.error().to_string())
                }
                Ok(envelope) => (i64::from(reply.status), envelope.error().to_string()),
                Err(_) => (i64::from(reply.status), snippet(&text)),
            };
            let err = ApiError::Network {
                url: request.url.clone(),
                code,
                error,
            };
            tracing::error!(verb = %request.method, url = %request.url, status = reply.status, error = %err, "LXD request failed");
            return Err(err);
        }

        let envelope = parsed?;
        tracing::trace!(url = %request.url, status = envelope.status(), "LXD reply parsed");
        Ok(envelope)
    }
}

fn parse_object(url: &str, text: &str) -> Result<Envelope> {
    let value: Value = serde_json::from_str(text).map_err(|e| {
        let err = ApiError::Parse {
            url: url.to_string(),
            details: e.to_string(),
            payload: snippet(text),
        };
        tracing::debug!(url = %url, payload = %snippet(text), error = %e, "Error parsing JSON response");
        err
    })?;

    match value {
        Value::Object(fields) => Ok(Envelope::new(fields)),
        other => {
            let payload = snippet(&other.to_string());
            tracing::debug!(url = %url, payload = %payload, "Invalid LXD response");
            Err(ApiError::UnexpectedShape {
                url: url.to_string(),
                payload,
            })
        }
    }
}

fn snippet(text: &str) -> String {
    match text.char_indices().nth(PAYLOAD_SNIPPET_LEN) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
