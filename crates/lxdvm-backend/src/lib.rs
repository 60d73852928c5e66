//! # lxdvm-backend
//!
//! Virtual machine lifecycle backend driving LXD.
//!
//! Instances are LXD virtual machines in one project, attached to one
//! bridge, with cloud-init passed through instance config.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     lxdvm-backend                        │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌──────────────────────────┐   ┌────────────────────┐   │
//! │  │ LxdVirtualMachineFactory │──▶│ LxdVirtualMachine  │   │
//! │  │  - health check          │   │  - start/shutdown  │   │
//! │  │  - networks()            │   │  - ensure_running  │   │
//! │  │  - version               │   │  - ssh_hostname    │   │
//! │  └──────────────────────────┘   └────────────────────┘   │
//! │        │          │                   │         │        │
//! │        ▼          ▼                   ▼         ▼        │
//! │   Platform   LxdClient ◀──────────────┘   StatusMonitor  │
//! │  (sysfs)        │                         MaintenanceGuard│
//! └─────────────────┼────────────────────────────────────────┘
//!                   ▼
//!        /var/snap/lxd/common/lxd/unix.socket
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use lxdvm_backend::{BackendConfig, NoopMonitor, VirtualMachineFactory};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example(description: lxdvm_backend::InstanceDescription) -> lxdvm_backend::Result<()> {
//! let factory = BackendConfig::from_env().factory();
//! factory.hypervisor_health_check().await?;
//!
//! let vm = factory
//!     .create_virtual_machine(description, Arc::new(NoopMonitor))
//!     .await?;
//! vm.start().await?;
//! let address = vm.ssh_hostname(Duration::from_secs(120)).await?;
//! println!("ssh {}@{}", vm.ssh_username(), address);
//!
//! vm.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod config;
mod description;
mod error;
mod factory;
mod instance;
mod maintenance;
mod monitor;
mod network;
mod platform;
mod state;

pub use backend::{VirtualMachine, VirtualMachineFactory};
pub use config::{BackendConfig, DEFAULT_SOCKET};
pub use description::{
    CloudInitDocuments, InstanceDescription, InvalidMemorySize, MemorySize, NetworkInterface,
    VmImage,
};
pub use error::{CoreError, Result};
pub use factory::LxdVirtualMachineFactory;
pub use instance::{InstanceContext, LxdVirtualMachine, UNKNOWN_ADDRESS};
pub use maintenance::{MaintenanceGuard, MarkerFile, NoMaintenance};
pub use monitor::{NoopMonitor, StatusMonitor};
pub use platform::{LinuxPlatform, NetworkInterfaceInfo, Platform};
pub use state::InstanceState;

/// Re-exported so callers can build clients without depending on
/// `lxdvm-api` directly.
pub use lxdvm_api::{LxdClient, RequestPolicy};
