//! Host network interface inspection.

use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A network interface visible to instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkInterfaceInfo {
    /// Interface name, e.g. `mpbr0`.
    pub id: String,
    /// Interface kind: `bridge`, `ethernet` or `virtual`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Human readable description.
    pub description: String,
    /// Hardware address, when known.
    pub mac: Option<String>,
}

/// Source of host interface metadata.
pub trait Platform: Send + Sync {
    /// All host interfaces, keyed by name.
    fn network_interfaces_info(&self) -> std::io::Result<HashMap<String, NetworkInterfaceInfo>>;
}

/// Reads interfaces from sysfs.
#[derive(Debug, Clone)]
pub struct LinuxPlatform {
    root: PathBuf,
}

impl Default for LinuxPlatform {
    fn default() -> Self {
        Self::with_root("/sys/class/net")
    }
}

impl LinuxPlatform {
    /// Read interfaces below `root` instead of `/sys/class/net`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn describe(dir: &Path, id: &str) -> NetworkInterfaceInfo {
        let mac = std::fs::read_to_string(dir.join("address"))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let (kind, description) = if dir.join("bridge").is_dir() {
            let mut members: Vec<String> = std::fs::read_dir(dir.join("brif"))
                .map(|entries| {
                    entries
                        .filter_map(|e| e.ok())
                        .map(|e| e.file_name().to_string_lossy().into_owned())
                        .collect()
                })
                .unwrap_or_default();
            members.sort();

            let description = if members.is_empty() {
                "Network bridge".to_string()
            } else {
                format!("Network bridge with {}", members.join(", "))
            };
            ("bridge", description)
        } else if dir.join("device").exists() {
            ("ethernet", "Ethernet device".to_string())
        } else {
            ("virtual", "Virtual device".to_string())
        };

        NetworkInterfaceInfo {
            id: id.to_string(),
            kind: kind.to_string(),
            description,
            mac,
        }
    }
}

impl Platform for LinuxPlatform {
    fn network_interfaces_info(&self) -> std::io::Result<HashMap<String, NetworkInterfaceInfo>> {
        let mut interfaces = HashMap::new();

        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let id = entry.file_name().to_string_lossy().into_owned();
            if id == "lo" {
                continue;
            }
            interfaces.insert(id.clone(), Self::describe(&entry.path(), &id));
        }

        tracing::trace!(count = interfaces.len(), root = %self.root.display(), "Read host interfaces");
        Ok(interfaces)
    }
}
