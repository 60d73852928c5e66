//! LXD virtual machine state machine.
//!
//! [`LxdVirtualMachine`] owns the believed state of one LXD instance and
//! turns lifecycle calls into LXD requests. The remote status always wins
//! over the cached one, with one exception: an instance that LXD reports
//! as running but that has no IPv4 address yet stays `starting` while a
//! start is in progress.
//!
//! ```text
//!            start                      (remote)
//! stopped ──────────▶ starting ──────────────────▶ running
//!    ▲                   │  ensure_running: still      │
//!    │                   │  stopped after reboot window │ shutdown
//!    └───────────────────┴──────────────────────────────┘
//! ```

use crate::backend::VirtualMachine;
use crate::description::InstanceDescription;
use crate::error::{CoreError, Result};
use crate::maintenance::MaintenanceGuard;
use crate::monitor::StatusMonitor;
use crate::state::InstanceState;
use async_trait::async_trait;
use lxdvm_api::{wait, Envelope, LxdClient};
use serde_json::{json, Map, Value};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Returned by `management_ipv4` when no lease matches.
pub const UNKNOWN_ADDRESS: &str = "UNKNOWN";

/// How long instance creation may take, image unpacking included.
const CREATE_TIMEOUT: Duration = Duration::from_secs(600);

/// How long a stop may take.
const STOP_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval between management address lookups.
const ADDRESS_POLL_INTERVAL: Duration = Duration::from_secs(1);

const SSH_PORT: u16 = 22;

const SHUTDOWN_DURING_START: &str = "Instance shutdown during start";

/// Collaborators and placement shared by the instances of one backend.
#[derive(Clone)]
pub struct InstanceContext {
    /// LXD client.
    pub client: LxdClient,
    /// Bridge the primary NIC is attached to.
    pub bridge: String,
    /// LXD project holding the instances.
    pub project: String,
    /// Receives state transitions after start and shutdown.
    pub monitor: Arc<dyn StatusMonitor>,
    /// Consulted on teardown.
    pub maintenance: Arc<dyn MaintenanceGuard>,
}

/// Remote state as read from LXD.
#[derive(Debug, Clone, Copy)]
struct Observed {
    state: InstanceState,
    has_ipv4: bool,
}

/// One LXD virtual machine.
///
/// Lifecycle transitions (`create`, `start`, `shutdown`, `destroy`) are
/// serialized; state queries and `ensure_running` may run alongside them.
pub struct LxdVirtualMachine {
    description: InstanceDescription,
    context: InstanceContext,
    state: Mutex<InstanceState>,
    management_ip: Mutex<Option<Ipv4Addr>>,
    transition: tokio::sync::Mutex<()>,
    destroyed: AtomicBool,
}

impl LxdVirtualMachine {
    /// Wrap `description`. No request is made until [`create`](Self::create)
    /// or another operation is called.
    pub fn new(description: InstanceDescription, context: InstanceContext) -> Self {
        Self {
            description,
            context,
            state: Mutex::new(InstanceState::Stopped),
            management_ip: Mutex::new(None),
            transition: tokio::sync::Mutex::new(()),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Instance name.
    pub fn name(&self) -> &str {
        &self.description.vm_name
    }

    /// Locally believed state, without asking LXD.
    pub fn state(&self) -> InstanceState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: InstanceState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn state_path(&self) -> String {
        format!(
            "virtual-machines/{}/state?project={}",
            self.name(),
            self.context.project
        )
    }

    fn leases_path(&self) -> String {
        format!("networks/{}/leases", self.context.bridge)
    }

    /// Create the instance in LXD unless it already exists.
    ///
    /// Blocks until the creation operation finishes, then reads the state
    /// back.
    pub async fn create(&self) -> Result<()> {
        let _transition = self.transition.lock().await;

        match self.refresh_state().await {
            Ok(state) => {
                tracing::debug!(instance = %self.name(), %state, "Instance already exists");
                return Ok(());
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let start = Instant::now();
        tracing::info!(
            instance = %self.name(),
            cpus = self.description.num_cores,
            memory = %self.description.mem_size,
            "Creating instance"
        );

        let body = creation_request(&self.description, &self.context.bridge)?;
        let path = format!("virtual-machines?project={}", self.context.project);
        let operation = self.context.client.post(&path, body).await?;
        wait(&self.context.client, &operation, CREATE_TIMEOUT).await?;

        let state = self.refresh_state().await?;
        tracing::info!(
            instance = %self.name(),
            %state,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Instance created"
        );
        Ok(())
    }

    /// Start the instance, or resume it when frozen.
    ///
    /// Does not wait for the instance to boot: the state becomes `starting`
    /// and [`ensure_running`](Self::ensure_running) confirms it later.
    pub async fn start(&self) -> Result<()> {
        let _transition = self.transition.lock().await;

        match self.refresh_state().await? {
            InstanceState::Suspending => {
                return Err(CoreError::InvalidState(
                    "cannot start the instance while suspending".into(),
                ));
            }
            InstanceState::Running => {
                tracing::debug!(instance = %self.name(), "Instance is already running");
                return Ok(());
            }
            InstanceState::Suspended => {
                tracing::info!(instance = %self.name(), "Resuming from a suspended state");
                self.request_state("unfreeze").await?;
            }
            InstanceState::Stopped | InstanceState::Starting | InstanceState::Unknown => {
                tracing::info!(instance = %self.name(), "Starting instance");
                self.request_state("start").await?;
            }
        }

        self.set_state(InstanceState::Starting);
        self.context
            .monitor
            .persist_state_for(self.name(), InstanceState::Starting);
        Ok(())
    }

    /// Stop the instance and wait until LXD reports it stopped.
    pub async fn shutdown(&self) -> Result<()> {
        let _transition = self.transition.lock().await;

        match self.refresh_state().await? {
            InstanceState::Stopped => {
                tracing::debug!(
                    instance = %self.name(),
                    "Ignoring stop request since instance is already stopped"
                );
                return Ok(());
            }
            InstanceState::Suspended => {
                tracing::info!(
                    instance = %self.name(),
                    "Ignoring shutdown issued while suspended"
                );
                return Ok(());
            }
            _ => {}
        }

        let start = Instant::now();
        tracing::info!(instance = %self.name(), "Stopping instance");
        self.stop_and_wait().await?;

        let state = self.refresh_state().await?;
        if state != InstanceState::Stopped {
            tracing::error!(instance = %self.name(), %state, "Instance did not stop");
            return Err(CoreError::Shutdown {
                name: self.name().to_string(),
                state,
            });
        }

        self.context
            .monitor
            .persist_state_for(self.name(), InstanceState::Stopped);
        tracing::info!(
            instance = %self.name(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Instance stopped"
        );
        Ok(())
    }

    /// Always fails; freezing is not offered by this backend.
    pub async fn suspend(&self) -> Result<()> {
        Err(CoreError::Unsupported("suspend"))
    }

    /// Query LXD for the state, degrading any failure to `unknown`.
    pub async fn current_state(&self) -> InstanceState {
        match self.refresh_state().await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(instance = %self.name(), error = %e, "Could not read instance state");
                self.set_state(InstanceState::Unknown);
                InstanceState::Unknown
            }
        }
    }

    /// Confirm a started instance is still up.
    ///
    /// A stopped instance gets `timeout` to come back, since LXD briefly
    /// reports a rebooting guest as stopped. If it is still stopped after
    /// that, the start failed.
    ///
    /// # Errors
    ///
    /// [`CoreError::Start`] with "Instance shutdown during start".
    pub async fn ensure_running(&self, timeout: Duration) -> Result<()> {
        if self.current_state().await != InstanceState::Stopped {
            return Ok(());
        }

        tokio::time::sleep(timeout).await;

        if self.current_state().await != InstanceState::Stopped {
            tracing::debug!(instance = %self.name(), "Instance came back after reboot");
            self.set_state(InstanceState::Starting);
            return Ok(());
        }

        self.set_state(InstanceState::Stopped);
        tracing::error!(instance = %self.name(), "{SHUTDOWN_DURING_START}");
        Err(CoreError::Start {
            name: self.name().to_string(),
            message: SHUTDOWN_DURING_START.to_string(),
        })
    }

    /// Leased IPv4 address of the primary NIC, or [`UNKNOWN_ADDRESS`].
    pub async fn management_ipv4(&self) -> Result<String> {
        match self.lookup_management_ip().await? {
            Some(ip) => Ok(ip.to_string()),
            None => {
                tracing::trace!(instance = %self.name(), "IP address not found");
                Ok(UNKNOWN_ADDRESS.to_string())
            }
        }
    }

    /// Poll for the management address for up to `timeout`.
    ///
    /// # Errors
    ///
    /// [`CoreError::AddressTimeout`] when none appears; the state becomes
    /// `unknown`.
    pub async fn ssh_hostname(&self, timeout: Duration) -> Result<String> {
        let start = Instant::now();

        loop {
            match self.lookup_management_ip().await {
                Ok(Some(ip)) => return Ok(ip.to_string()),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(instance = %self.name(), error = %e, "Lease lookup failed, retrying");
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                self.set_state(InstanceState::Unknown);
                tracing::error!(
                    instance = %self.name(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Failed to determine IP address"
                );
                return Err(CoreError::AddressTimeout {
                    name: self.name().to_string(),
                    timeout,
                });
            }

            tokio::time::sleep(ADDRESS_POLL_INTERVAL.min(timeout - elapsed)).await;
        }
    }

    /// SSH user from the description.
    pub fn ssh_username(&self) -> &str {
        &self.description.ssh_username
    }

    /// SSH port.
    pub fn ssh_port(&self) -> u16 {
        SSH_PORT
    }

    /// Release the instance.
    ///
    /// Stops it (and waits) unless it is already stopped or the host is in
    /// maintenance. Failures are logged, not returned, and the status
    /// monitor is never told.
    pub async fn destroy(&self) {
        let _transition = self.transition.lock().await;
        self.destroyed.store(true, Ordering::SeqCst);

        if self.context.maintenance.is_active() {
            tracing::info!(
                instance = %self.name(),
                "Host maintenance in progress, leaving instance as is"
            );
            return;
        }

        let state = match self.refresh_state().await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(instance = %self.name(), error = %e, "Could not read state on teardown");
                return;
            }
        };

        if state == InstanceState::Stopped {
            return;
        }

        match self.stop_and_wait().await {
            Ok(()) => {
                self.set_state(InstanceState::Stopped);
                tracing::debug!(instance = %self.name(), "Instance stopped on teardown");
            }
            Err(e) => {
                tracing::error!(instance = %self.name(), error = %e, "Failed to stop instance on teardown");
            }
        }
    }

    /// Whether [`destroy`](Self::destroy) has been called.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Read the remote state and fold it into the believed one.
    async fn refresh_state(&self) -> Result<InstanceState> {
        let observed = self.observe().await?;

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let next = match observed.state {
            InstanceState::Running if !observed.has_ipv4 && *state == InstanceState::Starting => {
                InstanceState::Starting
            }
            other => other,
        };
        *state = next;
        Ok(next)
    }

    async fn observe(&self) -> Result<Observed> {
        let reply = self.context.client.get(&self.state_path()).await?;
        let metadata = reply.metadata();

        let status = metadata
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let status_code = metadata
            .get("status_code")
            .and_then(Value::as_i64)
            .unwrap_or_default();

        tracing::trace!(instance = %self.name(), status, status_code, "Got LXD instance state");

        let state = InstanceState::from_lxd(status, status_code).unwrap_or_else(|| {
            tracing::error!(
                instance = %self.name(),
                status,
                status_code,
                "Got unexpected LXD state: {status} ({status_code})"
            );
            InstanceState::Unknown
        });

        Ok(Observed {
            state,
            has_ipv4: has_ipv4(metadata),
        })
    }

    async fn request_state(&self, action: &str) -> Result<Envelope> {
        tracing::debug!(instance = %self.name(), action, "Requesting state change");
        Ok(self
            .context
            .client
            .put(&self.state_path(), json!({ "action": action }))
            .await?)
    }

    async fn stop_and_wait(&self) -> Result<()> {
        let operation = self.request_state("stop").await?;

        match wait(&self.context.client, &operation, STOP_TIMEOUT).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                tracing::debug!(instance = %self.name(), "Stop operation already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn lookup_management_ip(&self) -> Result<Option<Ipv4Addr>> {
        let cached = *self
            .management_ip
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if cached.is_some() {
            return Ok(cached);
        }

        let reply = self.context.client.get(&self.leases_path()).await?;
        let found = lease_for(reply.metadata(), &self.description.default_mac_address);

        if let Some(ip) = found {
            tracing::debug!(instance = %self.name(), %ip, "Found management address");
            *self
                .management_ip
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(ip);
        }
        Ok(found)
    }
}

#[async_trait]
impl VirtualMachine for LxdVirtualMachine {
    fn name(&self) -> &str {
        LxdVirtualMachine::name(self)
    }

    async fn start(&self) -> Result<()> {
        LxdVirtualMachine::start(self).await
    }

    async fn shutdown(&self) -> Result<()> {
        LxdVirtualMachine::shutdown(self).await
    }

    async fn suspend(&self) -> Result<()> {
        LxdVirtualMachine::suspend(self).await
    }

    async fn current_state(&self) -> InstanceState {
        LxdVirtualMachine::current_state(self).await
    }

    async fn ensure_running(&self, timeout: Duration) -> Result<()> {
        LxdVirtualMachine::ensure_running(self, timeout).await
    }

    async fn management_ipv4(&self) -> Result<String> {
        LxdVirtualMachine::management_ipv4(self).await
    }

    async fn ssh_hostname(&self, timeout: Duration) -> Result<String> {
        LxdVirtualMachine::ssh_hostname(self, timeout).await
    }

    fn ssh_port(&self) -> u16 {
        LxdVirtualMachine::ssh_port(self)
    }

    fn ssh_username(&self) -> &str {
        LxdVirtualMachine::ssh_username(self)
    }

    async fn destroy(&self) {
        LxdVirtualMachine::destroy(self).await
    }
}

impl Drop for LxdVirtualMachine {
    fn drop(&mut self) {
        if !self.is_destroyed() {
            tracing::warn!(
                instance = %self.name(),
                "Instance dropped without destroy, it may still be running"
            );
        }
    }
}

/// Whether any non-loopback interface in an instance state document has an
/// IPv4 address.
fn has_ipv4(metadata: &Value) -> bool {
    let Some(interfaces) = metadata.get("network").and_then(Value::as_object) else {
        return false;
    };

    interfaces
        .iter()
        .filter(|(name, _)| name.as_str() != "lo")
        .filter_map(|(_, iface)| iface.get("addresses").and_then(Value::as_array))
        .flatten()
        .any(|addr| addr.get("family").and_then(Value::as_str) == Some("inet"))
}

/// First IPv4 lease for `mac` in a leases listing.
fn lease_for(leases: &Value, mac: &str) -> Option<Ipv4Addr> {
    leases
        .as_array()?
        .iter()
        .filter(|lease| {
            lease
                .get("hwaddr")
                .and_then(Value::as_str)
                .is_some_and(|hwaddr| hwaddr.eq_ignore_ascii_case(mac))
        })
        .find_map(|lease| lease.get("address")?.as_str()?.parse().ok())
}

/// Render a cloud-init document the way LXD's `user.*` keys expect it.
fn render_cloud_config(document: &serde_yaml::Value) -> Result<String> {
    Ok(format!("#cloud-config\n{}\n", serde_yaml::to_string(document)?))
}

fn bridged_nic(name: &str, parent: &str, mac: &str) -> Value {
    json!({
        "hwaddr": mac,
        "name": name,
        "nictype": "bridged",
        "parent": parent,
        "type": "nic",
    })
}

/// Body of `POST /1.0/virtual-machines` for `description`.
fn creation_request(description: &InstanceDescription, bridge: &str) -> Result<Value> {
    let mut config = Map::new();
    config.insert(
        "limits.cpu".into(),
        description.num_cores.to_string().into(),
    );
    config.insert(
        "limits.memory".into(),
        description.mem_size.in_bytes().to_string().into(),
    );
    config.insert("security.secureboot".into(), "false".into());

    let documents = &description.cloud_init;
    for (key, document) in [
        ("user.meta-data", &documents.meta_data),
        ("user.user-data", &documents.user_data),
        ("user.vendor-data", &documents.vendor_data),
        ("user.network-config", &documents.network_data),
    ] {
        if let Some(document) = document {
            config.insert(key.into(), render_cloud_config(document)?.into());
        }
    }

    let mut devices = Map::new();
    devices.insert(
        "config".into(),
        json!({ "source": "cloud-init:config", "type": "disk" }),
    );
    devices.insert(
        "eth0".into(),
        bridged_nic("eth0", bridge, &description.default_mac_address),
    );
    for (index, interface) in description.extra_interfaces.iter().enumerate() {
        let name = format!("eth{}", index + 1);
        let nic = bridged_nic(&name, &interface.id, &interface.mac_address);
        devices.insert(name, nic);
    }
    devices.insert(
        "root".into(),
        json!({
            "path": "/",
            "pool": "default",
            "size": description.disk_space.in_bytes().to_string(),
            "type": "disk",
        }),
    );

    Ok(json!({
        "config": config,
        "devices": devices,
        "name": description.vm_name,
        "source": {
            "fingerprint": description.image_fingerprint,
            "type": "image",
        },
    }))
}
