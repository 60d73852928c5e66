//! Backend configuration.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use crate::factory::LxdVirtualMachineFactory;
use crate::maintenance::{MaintenanceGuard, MarkerFile, NoMaintenance};
use crate::platform::{LinuxPlatform, Platform};
use lxdvm_api::{LxdClient, RequestPolicy, DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_RETRIES};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Socket of the snap-packaged LXD daemon.
pub const DEFAULT_SOCKET: &str = "/var/snap/lxd/common/lxd/unix.socket";

/// Marker file name created under `$SNAP_COMMON` during a snap refresh.
const MAINTENANCE_MARKER_NAME: &str = "snap_refresh";

/// Configuration for the LXD backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    /// LXD daemon socket.
    pub socket_path: PathBuf,

    /// REST API version prefix (default: `1.0`).
    pub api_version: String,

    /// LXD project instances live in (default: `lxdvm`).
    pub project: String,

    /// Bridge instances attach to (default: `mpbr0`).
    pub bridge: String,

    /// Backend data directory.
    pub data_dir: PathBuf,

    /// Time allowed for one request attempt (default: 30s).
    pub request_timeout: Duration,

    /// Extra attempts after a timed-out one (default: 3).
    pub request_retries: u32,

    /// File whose presence marks a host maintenance window.
    pub maintenance_marker: Option<PathBuf>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET),
            api_version: "1.0".to_string(),
            project: "lxdvm".to_string(),
            bridge: "mpbr0".to_string(),
            data_dir: PathBuf::from("/var/lib/lxdvm"),
            request_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            request_retries: DEFAULT_RETRIES,
            maintenance_marker: None,
        }
    }
}

impl BackendConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `LXDVM_SOCKET` | `/var/snap/lxd/common/lxd/unix.socket` |
    /// | `LXDVM_API_VERSION` | `1.0` |
    /// | `LXDVM_PROJECT` | `lxdvm` |
    /// | `LXDVM_BRIDGE` | `mpbr0` |
    /// | `LXDVM_DATA_DIR` | `/var/lib/lxdvm` |
    /// | `LXDVM_REQUEST_TIMEOUT_SECS` | `30` |
    /// | `LXDVM_REQUEST_RETRIES` | `3` |
    /// | `LXDVM_MAINTENANCE_MARKER` | `$SNAP_COMMON/snap_refresh`, none outside a snap |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();

        let maintenance_marker = lookup("LXDVM_MAINTENANCE_MARKER")
            .map(PathBuf::from)
            .or_else(|| {
                lookup("SNAP_COMMON").map(|dir| PathBuf::from(dir).join(MAINTENANCE_MARKER_NAME))
            });

        Self {
            socket_path: lookup("LXDVM_SOCKET")
                .map(PathBuf::from)
                .unwrap_or(default.socket_path),
            api_version: lookup("LXDVM_API_VERSION").unwrap_or(default.api_version),
            project: lookup("LXDVM_PROJECT").unwrap_or(default.project),
            bridge: lookup("LXDVM_BRIDGE").unwrap_or(default.bridge),
            data_dir: lookup("LXDVM_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.data_dir),
            request_timeout: lookup("LXDVM_REQUEST_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.request_timeout),
            request_retries: lookup("LXDVM_REQUEST_RETRIES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.request_retries),
            maintenance_marker,
        }
    }

    /// Validate configuration but only log warnings instead of failing.
    pub fn validate_warn(&self) {
        if !self.socket_path.exists() {
            tracing::warn!("LXD socket not found: {:?}", self.socket_path);
        }

        if !self.data_dir.exists() {
            tracing::warn!("Data directory not found: {:?}", self.data_dir);
        }

        if self.request_timeout.is_zero() {
            tracing::warn!("Request timeout is zero, every request will time out");
        }
    }

    /// Timeout policy for LXD requests.
    pub fn request_policy(&self) -> RequestPolicy {
        RequestPolicy::new(self.request_timeout, self.request_retries)
    }

    /// Client for the configured socket.
    pub fn client(&self) -> LxdClient {
        LxdClient::unix(&self.socket_path, self.api_version.clone())
            .with_policy(self.request_policy())
    }

    /// Maintenance guard for the configured marker.
    pub fn maintenance_guard(&self) -> Arc<dyn MaintenanceGuard> {
        match &self.maintenance_marker {
            Some(path) => Arc::new(MarkerFile::new(path)),
            None => Arc::new(NoMaintenance),
        }
    }

    /// Factory wired to the local host.
    pub fn factory(&self) -> LxdVirtualMachineFactory {
        self.factory_with(self.client(), Arc::new(LinuxPlatform::default()))
    }

    /// Factory sending through `client` and inspecting `platform`.
    pub fn factory_with(
        &self,
        client: LxdClient,
        platform: Arc<dyn Platform>,
    ) -> LxdVirtualMachineFactory {
        LxdVirtualMachineFactory::new(
            client,
            &self.socket_path,
            &self.project,
            &self.bridge,
            &self.data_dir,
            platform,
            self.maintenance_guard(),
        )
    }
}
