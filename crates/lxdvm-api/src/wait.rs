//! Waiting on LXD background operations.
//!
//! State-changing requests (create, start, stop) answer with an `async`
//! envelope naming an operation. [`wait`] blocks on the operation's `/wait`
//! endpoint and checks the result in three independent steps.

use crate::client::{LxdClient, RequestPolicy};
use crate::envelope::Envelope;
use crate::error::{ApiError, Result};
use crate::transport::Method;
use serde_json::Value;
use std::time::Duration;

/// Extra time allowed for the daemon to answer after the server-side wait
/// ends.
const WAIT_GRACE: Duration = Duration::from_secs(5);

/// Wait for the operation described by `operation` to finish.
///
/// Non-async envelopes have nothing to wait on and are returned unchanged.
/// For async ones this issues `GET operations/<id>/wait?timeout=<secs>` and
/// returns the terminal envelope, whose `metadata` holds the finished
/// operation.
///
/// # Errors
///
/// Checked in order, none retried:
/// 1. a non-zero `error_code` ([`ApiError::OperationError`])
/// 2. a failing top-level `status_code` ([`ApiError::OperationFailure`])
/// 3. a failing `metadata.status_code` ([`ApiError::OperationCompleted`])
///
/// Transport errors from the wait request itself are passed through; in
/// particular [`ApiError::NotFound`] means the daemon no longer knows the
/// operation.
pub async fn wait(client: &LxdClient, operation: &Envelope, timeout: Duration) -> Result<Envelope> {
    if !operation.is_async() {
        tracing::trace!(kind = operation.kind(), "Reply is not an operation, nothing to wait on");
        return Ok(operation.clone());
    }

    let id = operation.operation_id().ok_or_else(|| {
        tracing::error!("Async LXD reply without an operation id");
        ApiError::MissingOperation
    })?;

    let path = format!("operations/{id}/wait?timeout={}", timeout.as_secs().max(1));
    let policy = RequestPolicy::single(timeout.saturating_add(WAIT_GRACE));

    let start = tokio::time::Instant::now();
    tracing::debug!(operation = %id, timeout_secs = timeout.as_secs(), "Waiting on LXD operation");

    let reply = client.request_unchecked(Method::GET, &path, &policy).await?;

    if reply.error_code() != 0 {
        return Err(logged(ApiError::OperationError {
            code: reply.error_code(),
            error: reply.error().to_string(),
        }));
    }

    if is_failure(reply.status_code()) {
        return Err(logged(ApiError::OperationFailure {
            code: reply.status_code(),
            status: reply.status().to_string(),
        }));
    }

    let metadata = reply.metadata();
    let metadata_code = metadata
        .get("status_code")
        .and_then(Value::as_i64)
        .unwrap_or_default();
    if is_failure(metadata_code) {
        return Err(logged(ApiError::OperationCompleted {
            code: metadata_code,
            err: metadata
                .get("err")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }));
    }

    let status = metadata
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default();
    tracing::debug!(
        operation = %id,
        status,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "LXD operation finished"
    );
    Ok(reply)
}

fn is_failure(status_code: i64) -> bool {
    status_code >= 400
}

fn logged(err: ApiError) -> ApiError {
    tracing::error!(error = %err, "LXD operation failed");
    err
}
