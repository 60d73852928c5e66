//! Backend-neutral interfaces.
//!
//! A hypervisor backend provides a [`VirtualMachineFactory`] that builds
//! [`VirtualMachine`] handles. Callers drive instances only through these
//! traits, so backends stay interchangeable.

use crate::description::{CloudInitDocuments, InstanceDescription, VmImage};
use crate::error::Result;
use crate::monitor::StatusMonitor;
use crate::platform::NetworkInterfaceInfo;
use crate::state::InstanceState;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// One managed instance.
#[async_trait]
pub trait VirtualMachine: Send + Sync {
    /// Instance name.
    fn name(&self) -> &str;

    /// Start or resume the instance. Returns once the request is accepted.
    async fn start(&self) -> Result<()>;

    /// Stop the instance and wait for it to be stopped.
    async fn shutdown(&self) -> Result<()>;

    /// Freeze the instance.
    async fn suspend(&self) -> Result<()>;

    /// Query the current state. Never fails; unreadable state is
    /// [`InstanceState::Unknown`].
    async fn current_state(&self) -> InstanceState;

    /// Confirm a started instance did not go down. `timeout` is how long a
    /// reboot may keep it stopped.
    async fn ensure_running(&self, timeout: Duration) -> Result<()>;

    /// Management IPv4 address, or `"UNKNOWN"`.
    async fn management_ipv4(&self) -> Result<String>;

    /// Address to reach the instance over SSH, polled for up to `timeout`.
    async fn ssh_hostname(&self, timeout: Duration) -> Result<String>;

    /// SSH port.
    fn ssh_port(&self) -> u16;

    /// SSH user.
    fn ssh_username(&self) -> &str;

    /// Release the instance, stopping it unless the host is in maintenance.
    async fn destroy(&self);
}

/// Creates instances and answers host-level queries for one backend.
#[async_trait]
pub trait VirtualMachineFactory: Send + Sync {
    /// Build (and create remotely if needed) the instance described by
    /// `description`.
    async fn create_virtual_machine(
        &self,
        description: InstanceDescription,
        monitor: Arc<dyn StatusMonitor>,
    ) -> Result<Box<dyn VirtualMachine>>;

    /// Verify the hypervisor is usable, bootstrapping what is missing.
    async fn hypervisor_health_check(&self) -> Result<()>;

    /// Networks instances can be attached to.
    async fn networks(&self) -> Result<Vec<NetworkInterfaceInfo>>;

    /// Turn a downloaded image into the one the backend stores.
    fn prepare_source_image(&self, image: VmImage) -> VmImage;

    /// Adjust an instance image before first boot.
    async fn prepare_instance_image(
        &self,
        image: &VmImage,
        description: &InstanceDescription,
    ) -> Result<()>;

    /// Build a cloud-init image for `name` under `dir`. `None` when the
    /// backend passes cloud-init some other way.
    fn make_cloud_init_image(
        &self,
        name: &str,
        dir: &Path,
        documents: &CloudInitDocuments,
    ) -> Result<Option<PathBuf>>;

    /// Drop backend resources held for a deleted instance.
    fn remove_resources_for(&self, name: &str);

    /// Backend name and version, e.g. `lxd-5.21`.
    async fn backend_version_string(&self) -> Result<String>;
}
