//! Host maintenance detection.
//!
//! While the host is being refreshed (for example the LXD snap is being
//! upgraded) instances must be left alone on teardown: stopping them would
//! kill guests that the refresh is about to bring back.

use std::path::{Path, PathBuf};

/// Reports whether a host maintenance window is active.
pub trait MaintenanceGuard: Send + Sync {
    /// `true` while maintenance is in progress.
    fn is_active(&self) -> bool;
}

impl<F> MaintenanceGuard for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_active(&self) -> bool {
        self()
    }
}

/// Maintenance is active while a marker file exists.
#[derive(Debug, Clone)]
pub struct MarkerFile {
    path: PathBuf,
}

impl MarkerFile {
    /// Watch the marker at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Marker path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MaintenanceGuard for MarkerFile {
    fn is_active(&self) -> bool {
        self.path.exists()
    }
}

/// Never in maintenance.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMaintenance;

impl MaintenanceGuard for NoMaintenance {
    fn is_active(&self) -> bool {
        false
    }
}
