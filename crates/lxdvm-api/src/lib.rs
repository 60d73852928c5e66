//! # lxdvm-api
//!
//! Client for the LXD REST API over the daemon's local Unix socket.
//!
//! ## Quick Start
//!
//! ```no_run
//! use lxdvm_api::{wait, LxdClient};
//! use std::time::Duration;
//!
//! # async fn example() -> lxdvm_api::Result<()> {
//! let client = LxdClient::unix("/var/snap/lxd/common/lxd/unix.socket", "1.0");
//!
//! // Plain query
//! let info = client.get("").await?;
//! println!("LXD {}", info.metadata()["environment"]["server_version"]);
//!
//! // State change, then block on the background operation
//! let op = client
//!     .put(
//!         "virtual-machines/test/state?project=lxdvm",
//!         serde_json::json!({"action": "stop"}),
//!     )
//!     .await?;
//! wait(&client, &op, Duration::from_secs(60)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Single-send requests**: timeouts extend the wait, never re-send
//! - **Structured failures**: every error is logged where it is detected
//! - **Operation waiting**: `/wait` with ordered failure checks
//! - **`mock` feature**: a scriptable `MockTransport` for tests

mod client;
mod envelope;
mod error;
mod transport;
mod wait;

#[cfg(any(test, feature = "mock"))]
mod mock;

pub use client::{LxdClient, RequestPolicy, DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_RETRIES};
pub use envelope::Envelope;
pub use error::{ApiError, Result};
pub use transport::{ApiRequest, Method, RawReply, RequestBody, Transport, UnixSocketTransport};
pub use wait::wait;

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockReply, MockTransport, NOT_FOUND_BODY};
