//! Shared fixtures for the backend integration tests.

#![allow(dead_code)]

use lxdvm_api::{ApiRequest, LxdClient, Method, MockReply, MockTransport, RequestBody};
use lxdvm_backend::{
    CloudInitDocuments, InstanceContext, InstanceDescription, InstanceState, LxdVirtualMachine,
    MaintenanceGuard, MemorySize, NoMaintenance, StatusMonitor,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

pub const INSTANCE: &str = "pied-piper-valley";
pub const MAC: &str = "00:16:3e:fe:f2:b9";
pub const LEASED_IP: &str = "10.217.27.168";
pub const OP_ID: &str = "b043d632-5c48-44b3-983c-a25660d61164";
pub const SOCKET: &str = "/tmp/lxdvm-test/unix.socket";
pub const PROJECT: &str = "lxdvm";
pub const BRIDGE: &str = "mpbr0";

pub const STATE_PATH: &str = "/1.0/virtual-machines/pied-piper-valley/state?project=lxdvm";
pub const LEASES_PATH: &str = "/1.0/networks/mpbr0/leases";

fn sync_reply(metadata: Value) -> String {
    json!({
        "type": "sync",
        "status": "Success",
        "status_code": 200,
        "operation": "",
        "error_code": 0,
        "error": "",
        "metadata": metadata,
    })
    .to_string()
}

fn status_code_for(status: &str) -> i64 {
    match status {
        "Started" => 101,
        "Stopped" => 102,
        "Running" => 103,
        "Cancelling" => 104,
        "Pending" => 105,
        "Starting" => 106,
        "Stopping" => 107,
        "Freezing" => 109,
        "Frozen" => 110,
        _ => 0,
    }
}

/// Instance state reply with `status`, optionally holding an IPv4 lease on
/// `enp5s0`.
pub fn vm_state(status: &str, with_address: bool) -> MockReply {
    let mut enp5s0 = vec![json!({
        "family": "inet6",
        "address": "fe80::216:3eff:fefe:f2b9",
        "netmask": "64",
        "scope": "link"
    })];
    if with_address {
        enp5s0.insert(
            0,
            json!({
                "family": "inet",
                "address": LEASED_IP,
                "netmask": "24",
                "scope": "global"
            }),
        );
    }

    MockReply::ok(sync_reply(json!({
        "status": status,
        "status_code": status_code_for(status),
        "pid": 4242,
        "processes": 21,
        "network": {
            "enp5s0": {
                "addresses": enp5s0,
                "hwaddr": MAC,
                "state": "up",
                "type": "broadcast"
            },
            "lo": {
                "addresses": [{
                    "family": "inet",
                    "address": "127.0.0.1",
                    "netmask": "8",
                    "scope": "local"
                }],
                "state": "up",
                "type": "loopback"
            }
        }
    })))
}

/// Async reply announcing a background operation.
pub fn operation(description: &str) -> MockReply {
    MockReply::status(
        202,
        json!({
            "type": "async",
            "status": "Operation created",
            "status_code": 100,
            "operation": format!("/1.0/operations/{OP_ID}"),
            "error_code": 0,
            "error": "",
            "metadata": {
                "id": OP_ID,
                "class": "task",
                "description": description,
                "status": "Running",
                "status_code": 103,
                "may_cancel": false,
                "err": ""
            }
        })
        .to_string(),
    )
}

/// Successful reply to `operations/<id>/wait`.
pub fn wait_success() -> MockReply {
    MockReply::ok(sync_reply(json!({
        "id": OP_ID,
        "class": "task",
        "status": "Success",
        "status_code": 200,
        "err": ""
    })))
}

/// Failed reply to `operations/<id>/wait`.
pub fn wait_failure(err: &str) -> MockReply {
    MockReply::ok(sync_reply(json!({
        "id": OP_ID,
        "class": "task",
        "status": "Failure",
        "status_code": 400,
        "err": err
    })))
}

/// Empty sync reply, as sent for synchronous writes.
pub fn sync_ok() -> MockReply {
    MockReply::ok(sync_reply(json!({})))
}

/// Leases for the bridge, one IPv6 and one IPv4 for [`MAC`].
pub fn leases() -> MockReply {
    MockReply::ok(sync_reply(json!([
        {
            "hostname": INSTANCE,
            "hwaddr": MAC,
            "address": "fd42:7d0c:51f4:9d7e:216:3eff:fefe:f2b9",
            "type": "dynamic",
            "location": "lxd-host"
        },
        {
            "hostname": INSTANCE,
            "hwaddr": MAC,
            "address": LEASED_IP,
            "type": "dynamic",
            "location": "lxd-host"
        },
        {
            "hostname": "hooli",
            "hwaddr": "00:16:3e:00:11:22",
            "address": "10.217.27.3",
            "type": "dynamic",
            "location": "lxd-host"
        }
    ])))
}

pub fn no_leases() -> MockReply {
    MockReply::ok(sync_reply(json!([])))
}

/// Server info reply with the given `auth` value.
pub fn server_info(auth: &str) -> MockReply {
    MockReply::ok(sync_reply(json!({
        "api_version": "1.0",
        "auth": auth,
        "environment": {
            "server": "lxd",
            "server_version": "5.21.1",
            "kernel": "Linux"
        }
    })))
}

/// Networks as LXD lists them on a typical host.
pub fn networks_realistic() -> MockReply {
    MockReply::ok(sync_reply(json!([
        {"name": "lxdbr0", "type": "bridge", "description": "LXD default bridge", "managed": true},
        {"name": "mpbr0", "type": "bridge", "description": "", "managed": true},
        {"name": "virbr0", "type": "bridge", "managed": false},
        {"name": "mpqemubr0", "type": "bridge", "description": "", "managed": false},
        {"name": "enp3s0", "type": "physical", "description": "", "managed": false},
        {"name": "lo", "type": "loopback", "description": "", "managed": false}
    ])))
}

/// Networks mixing malformed entries with two valid bridges.
pub fn networks_faulty() -> MockReply {
    MockReply::ok(sync_reply(json!([
        {"type": "bridge", "but": "noname"},
        {"name": "bla", "but": "notype"},
        {"name": 123, "type": "bridge"},
        {"name": "eth0", "type": 123},
        {"name": "", "type": "bridge"},
        "notdict",
        {"name": "br0", "type": "bridge", "description": "Australopithecus"},
        {"name": "br1", "type": "bridge", "description": "Homo erectus"},
        {"name": "enp3s0", "type": "physical", "description": "Not a bridge"}
    ])))
}

pub fn no_networks() -> MockReply {
    MockReply::ok(sync_reply(json!([])))
}

/// Replies handed out in order; the last one repeats.
#[derive(Default)]
pub struct Replies(Mutex<VecDeque<MockReply>>);

impl Replies {
    pub fn new(replies: impl IntoIterator<Item = MockReply>) -> Self {
        Self(Mutex::new(replies.into_iter().collect()))
    }

    pub fn next(&self) -> MockReply {
        let mut queue = self.0.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap_or_else(MockReply::not_found)
        }
    }
}

/// A scripted LXD daemon serving one instance.
#[derive(Default)]
pub struct FakeLxd {
    pub states: Replies,
    pub actions: Replies,
    pub waits: Replies,
    pub creates: Replies,
    pub leases: Replies,
}

impl FakeLxd {
    pub fn with_states(states: impl IntoIterator<Item = MockReply>) -> Self {
        Self {
            states: Replies::new(states),
            actions: Replies::new([operation("Stopping instance")]),
            waits: Replies::new([wait_success()]),
            creates: Replies::new([operation("Creating instance")]),
            leases: Replies::new([leases()]),
        }
    }

    pub fn actions(mut self, replies: impl IntoIterator<Item = MockReply>) -> Self {
        self.actions = Replies::new(replies);
        self
    }

    pub fn waits(mut self, replies: impl IntoIterator<Item = MockReply>) -> Self {
        self.waits = Replies::new(replies);
        self
    }

    pub fn leases(mut self, replies: impl IntoIterator<Item = MockReply>) -> Self {
        self.leases = Replies::new(replies);
        self
    }

    fn handle(&self, request: &ApiRequest) -> MockReply {
        let path = request.path.as_str();
        match request.method {
            Method::GET if path == STATE_PATH => self.states.next(),
            Method::GET if path == LEASES_PATH => self.leases.next(),
            Method::GET if path.starts_with(&format!("/1.0/operations/{OP_ID}/wait")) => {
                self.waits.next()
            }
            Method::PUT if path == STATE_PATH => self.actions.next(),
            Method::POST if path == "/1.0/virtual-machines?project=lxdvm" => self.creates.next(),
            _ => MockReply::not_found(),
        }
    }

    /// Serve requests from a client.
    pub fn serve(self) -> Harness {
        let fake = Arc::new(self);
        let transport = Arc::new(MockTransport::new(move |request| fake.handle(request)));
        Harness::new(transport)
    }
}

/// Client over a mock transport plus the collaborators instances need.
pub struct Harness {
    pub transport: Arc<MockTransport>,
    pub client: LxdClient,
    pub monitor: Arc<RecordingMonitor>,
}

impl Harness {
    pub fn new(transport: Arc<MockTransport>) -> Self {
        let client = LxdClient::new(transport.clone(), SOCKET, "1.0");
        Self {
            transport,
            client,
            monitor: Arc::new(RecordingMonitor::default()),
        }
    }

    pub fn vm(&self) -> LxdVirtualMachine {
        self.vm_with(Arc::new(NoMaintenance))
    }

    pub fn vm_with(&self, maintenance: Arc<dyn MaintenanceGuard>) -> LxdVirtualMachine {
        let context = InstanceContext {
            client: self.client.clone(),
            bridge: BRIDGE.to_string(),
            project: PROJECT.to_string(),
            monitor: self.monitor.clone(),
            maintenance,
        };
        LxdVirtualMachine::new(description(), context)
    }

    /// Number of state change requests carrying `action`.
    pub fn actions(&self, action: &str) -> usize {
        self.transport
            .requests()
            .iter()
            .filter(|r| r.method == Method::PUT && r.path == STATE_PATH)
            .filter(|r| matches!(&r.body, Some(RequestBody::Json(body)) if body["action"] == action))
            .count()
    }

    pub fn count(&self, method: &Method, fragment: &str) -> usize {
        self.transport.count(method, fragment)
    }

    /// JSON body of the first request with `method` to exactly `path`.
    pub fn body_of(&self, method: &Method, path: &str) -> Option<Value> {
        self.transport
            .requests()
            .into_iter()
            .find(|r| r.method == *method && r.path == path)
            .and_then(|r| match r.body {
                Some(RequestBody::Json(body)) => Some(body),
                _ => None,
            })
    }
}

/// Records every persisted state.
#[derive(Default)]
pub struct RecordingMonitor {
    calls: Mutex<Vec<(String, InstanceState)>>,
}

impl RecordingMonitor {
    pub fn calls(&self) -> Vec<(String, InstanceState)> {
        self.calls.lock().unwrap().clone()
    }
}

impl StatusMonitor for RecordingMonitor {
    fn persist_state_for(&self, name: &str, state: InstanceState) {
        self.calls.lock().unwrap().push((name.to_string(), state));
    }
}

pub fn description() -> InstanceDescription {
    InstanceDescription {
        num_cores: 2,
        mem_size: "3M".parse().unwrap(),
        disk_space: MemorySize::from_bytes(16_000_000_000),
        vm_name: INSTANCE.to_string(),
        default_mac_address: MAC.to_string(),
        extra_interfaces: vec![],
        ssh_username: "yoda".to_string(),
        image_fingerprint: String::new(),
        cloud_init: CloudInitDocuments::default(),
    }
}

/// Formatted log output captured from the current thread.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    /// Capture every event emitted on this thread until the guard drops.
    pub fn capture() -> (Self, tracing::subscriber::DefaultGuard) {
        let buffer = Self::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (buffer, guard)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// Lines logged at `level` (e.g. `"TRACE"`) that contain `fragment`.
    pub fn lines_with(&self, level: &str, fragment: &str) -> usize {
        self.contents()
            .lines()
            .filter(|line| line.contains(level) && line.contains(fragment))
            .count()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
