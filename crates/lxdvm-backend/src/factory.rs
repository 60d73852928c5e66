//! LXD backend factory.

use crate::backend::{VirtualMachine, VirtualMachineFactory};
use crate::description::{CloudInitDocuments, InstanceDescription, VmImage};
use crate::error::{CoreError, Result};
use crate::instance::{InstanceContext, LxdVirtualMachine};
use crate::maintenance::MaintenanceGuard;
use crate::monitor::StatusMonitor;
use crate::network;
use crate::platform::{NetworkInterfaceInfo, Platform};
use async_trait::async_trait;
use lxdvm_api::{wait, ApiError, Envelope, LxdClient, Method, RequestBody};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// How long bootstrap operations (project, profile, network) may take.
const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(60);

/// Creates [`LxdVirtualMachine`]s in one project, attached to one bridge.
pub struct LxdVirtualMachineFactory {
    client: LxdClient,
    socket_path: PathBuf,
    project: String,
    bridge: String,
    data_dir: PathBuf,
    platform: Arc<dyn Platform>,
    maintenance: Arc<dyn MaintenanceGuard>,
}

impl LxdVirtualMachineFactory {
    /// Create a factory.
    ///
    /// `socket_path` is only used in the hint shown when the daemon cannot
    /// be reached.
    pub fn new(
        client: LxdClient,
        socket_path: impl Into<PathBuf>,
        project: impl Into<String>,
        bridge: impl Into<String>,
        data_dir: impl Into<PathBuf>,
        platform: Arc<dyn Platform>,
        maintenance: Arc<dyn MaintenanceGuard>,
    ) -> Self {
        Self {
            client,
            socket_path: socket_path.into(),
            project: project.into(),
            bridge: bridge.into(),
            data_dir: data_dir.into(),
            platform,
            maintenance,
        }
    }

    /// LXD client used by this factory and its instances.
    pub fn client(&self) -> &LxdClient {
        &self.client
    }

    /// Project instances are created in.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Bridge instances are attached to.
    pub fn bridge(&self) -> &str {
        &self.bridge
    }

    /// Backend data directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn context(&self, monitor: Arc<dyn StatusMonitor>) -> InstanceContext {
        InstanceContext {
            client: self.client.clone(),
            bridge: self.bridge.clone(),
            project: self.project.clone(),
            monitor,
            maintenance: Arc::clone(&self.maintenance),
        }
    }

    /// Map a connection failure to the hint naming the socket.
    fn unreachable(&self, err: ApiError) -> CoreError {
        if err.is_connection() {
            CoreError::Unreachable {
                socket: self.socket_path.display().to_string(),
                reason: err.to_string(),
            }
        } else {
            err.into()
        }
    }

    async fn server_info(&self) -> Result<Envelope> {
        self.client.get("").await.map_err(|e| self.unreachable(e))
    }

    /// GET `path`; when it is missing, send each of `create` in order and
    /// wait for it.
    async fn ensure_exists(&self, path: &str, create: Vec<(Method, String, Value)>) -> Result<()> {
        match self.client.get(path).await {
            Ok(_) => return Ok(()),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        for (method, create_path, body) in create {
            tracing::info!(verb = %method, path = %create_path, "Creating missing LXD object");
            let reply = self
                .client
                .request(method, &create_path, Some(RequestBody::Json(body)))
                .await?;
            wait(&self.client, &reply, BOOTSTRAP_TIMEOUT).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl VirtualMachineFactory for LxdVirtualMachineFactory {
    async fn create_virtual_machine(
        &self,
        description: InstanceDescription,
        monitor: Arc<dyn StatusMonitor>,
    ) -> Result<Box<dyn VirtualMachine>> {
        let vm = LxdVirtualMachine::new(description, self.context(monitor));
        vm.create().await?;
        Ok(Box::new(vm))
    }

    async fn hypervisor_health_check(&self) -> Result<()> {
        let info = self.server_info().await?;

        let auth = info
            .metadata()
            .get("auth")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if auth != "trusted" {
            tracing::error!(auth, "LXD does not trust this client");
            return Err(CoreError::Authentication);
        }

        self.ensure_exists(
            &format!("projects/{}", self.project),
            vec![
                (
                    Method::POST,
                    "projects".to_string(),
                    json!({
                        "description": "Project for lxdvm instances",
                        "name": self.project,
                    }),
                ),
                (
                    Method::PUT,
                    format!("profiles/default?project={}", self.project),
                    json!({
                        "description": "Default profile for lxdvm project",
                        "devices": {
                            "eth0": {
                                "name": "eth0",
                                "nictype": "bridged",
                                "parent": self.bridge,
                                "type": "nic",
                            }
                        }
                    }),
                ),
            ],
        )
        .await?;

        self.ensure_exists(
            &format!("networks/{}", self.bridge),
            vec![(
                Method::POST,
                "networks".to_string(),
                json!({
                    "description": "Network bridge for lxdvm",
                    "name": self.bridge,
                }),
            )],
        )
        .await?;

        tracing::debug!(project = %self.project, bridge = %self.bridge, "LXD health check passed");
        Ok(())
    }

    async fn networks(&self) -> Result<Vec<NetworkInterfaceInfo>> {
        network::list_bridges(&self.client, self.platform.as_ref()).await
    }

    fn prepare_source_image(&self, image: VmImage) -> VmImage {
        tracing::trace!("No driver preparation for source image");
        image
    }

    async fn prepare_instance_image(
        &self,
        _image: &VmImage,
        _description: &InstanceDescription,
    ) -> Result<()> {
        tracing::trace!("No driver preparation for instance image");
        Ok(())
    }

    fn make_cloud_init_image(
        &self,
        name: &str,
        _dir: &Path,
        _documents: &CloudInitDocuments,
    ) -> Result<Option<PathBuf>> {
        tracing::trace!("No cloud-init image needed for \"{name}\"");
        Ok(None)
    }

    fn remove_resources_for(&self, name: &str) {
        tracing::trace!("No resources to remove for \"{name}\"");
    }

    async fn backend_version_string(&self) -> Result<String> {
        let info = self.server_info().await?;
        let version = info
            .metadata()
            .pointer("/environment/server_version")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(format!("lxd-{version}"))
    }
}
