//! Immutable description of an instance to manage.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// A memory or disk size in bytes.
///
/// Parses plain byte counts (`16000000000`) and binary-unit suffixes
/// (`3M`, `512MiB`, `16G`, `4KB`), case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemorySize(u64);

/// A size string that could not be parsed.
#[derive(Debug, Error)]
#[error("invalid size: {0:?}")]
pub struct InvalidMemorySize(String);

impl MemorySize {
    /// Size of `bytes` bytes.
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Size in bytes.
    pub const fn in_bytes(&self) -> u64 {
        self.0
    }
}

impl FromStr for MemorySize {
    type Err = InvalidMemorySize;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (digits, unit) = trimmed.split_at(split);

        let value: u64 = digits
            .parse()
            .map_err(|_| InvalidMemorySize(s.to_string()))?;

        let shift = match unit.to_ascii_lowercase().as_str() {
            "" | "b" => 0,
            "k" | "kb" | "kib" => 10,
            "m" | "mb" | "mib" => 20,
            "g" | "gb" | "gib" => 30,
            _ => return Err(InvalidMemorySize(s.to_string())),
        };

        value
            .checked_mul(1u64 << shift)
            .map(Self)
            .ok_or_else(|| InvalidMemorySize(s.to_string()))
    }
}

impl std::fmt::Display for MemorySize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An additional NIC attached to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    /// Parent bridge on the host.
    pub id: String,
    /// MAC address of the NIC.
    pub mac_address: String,
    /// Whether the guest should configure the NIC automatically.
    pub auto_mode: bool,
}

/// Cloud-init documents passed to the guest. Any of them may be absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CloudInitDocuments {
    /// `meta-data`
    pub meta_data: Option<serde_yaml::Value>,
    /// `user-data`
    pub user_data: Option<serde_yaml::Value>,
    /// `vendor-data`
    pub vendor_data: Option<serde_yaml::Value>,
    /// `network-config`
    pub network_data: Option<serde_yaml::Value>,
}

/// An image in the local image store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmImage {
    /// Path of the image file.
    pub image_path: std::path::PathBuf,
    /// Image id (fingerprint).
    pub id: String,
    /// Release the image was fetched as.
    pub original_release: String,
    /// Release the image currently is.
    pub current_release: String,
    /// Release date.
    pub release_date: String,
    /// Alternative names.
    pub aliases: Vec<String>,
}

/// Fully resolved instance parameters. Never mutated by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceDescription {
    /// Number of virtual CPUs.
    pub num_cores: u32,
    /// Guest memory.
    pub mem_size: MemorySize,
    /// Root disk size.
    pub disk_space: MemorySize,
    /// Instance name, unique on the host.
    pub vm_name: String,
    /// MAC address of the primary (`eth0`) NIC.
    pub default_mac_address: String,
    /// NICs beyond `eth0`, in order (`eth1`, `eth2`, ...).
    pub extra_interfaces: Vec<NetworkInterface>,
    /// User for SSH access.
    pub ssh_username: String,
    /// Image fingerprint the instance is created from.
    pub image_fingerprint: String,
    /// Cloud-init configuration.
    pub cloud_init: CloudInitDocuments,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_size_units() {
        assert_eq!("3M".parse::<MemorySize>().unwrap().in_bytes(), 3_145_728);
        assert_eq!("3MiB".parse::<MemorySize>().unwrap().in_bytes(), 3_145_728);
        assert_eq!("2g".parse::<MemorySize>().unwrap().in_bytes(), 2 << 30);
        assert_eq!("4K".parse::<MemorySize>().unwrap().in_bytes(), 4096);
        assert_eq!(
            "16000000000".parse::<MemorySize>().unwrap().in_bytes(),
            16_000_000_000
        );
    }

    #[test]
    fn test_memory_size_rejects_garbage() {
        assert!("".parse::<MemorySize>().is_err());
        assert!("M".parse::<MemorySize>().is_err());
        assert!("12T".parse::<MemorySize>().is_err());
        assert!("1.5G".parse::<MemorySize>().is_err());
        assert!("99999999999999999999".parse::<MemorySize>().is_err());
    }

    #[test]
    fn test_memory_size_display_is_bytes() {
        assert_eq!(MemorySize::from_bytes(3_145_728).to_string(), "3145728");
    }
}
