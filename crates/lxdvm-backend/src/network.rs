//! Bridge network inventory.

use crate::error::Result;
use crate::platform::{NetworkInterfaceInfo, Platform};
use lxdvm_api::LxdClient;
use serde_json::Value;

/// Description used when neither LXD nor the host has one.
const DEFAULT_BRIDGE_DESCRIPTION: &str = "Network bridge";

/// List the bridges LXD knows about.
///
/// Entries without a usable string `name` or `type` are skipped, as is
/// anything that is not a bridge. Bridges LXD leaves undescribed get the
/// host's description for the same interface; the host is only asked when
/// at least one bridge needs it.
pub(crate) async fn list_bridges(
    client: &LxdClient,
    platform: &dyn Platform,
) -> Result<Vec<NetworkInterfaceInfo>> {
    let reply = client.get("networks?recursion=1").await?;

    let mut bridges: Vec<NetworkInterfaceInfo> = reply
        .metadata()
        .as_array()
        .map(|entries| entries.iter().filter_map(bridge_from).collect())
        .unwrap_or_default();

    if bridges.iter().any(|b| b.description.is_empty()) {
        let host = platform.network_interfaces_info().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not read host network interfaces");
            Default::default()
        });

        for bridge in bridges.iter_mut().filter(|b| b.description.is_empty()) {
            if let Some(info) = host.get(&bridge.id) {
                if !info.description.is_empty() {
                    bridge.description = info.description.clone();
                }
                bridge.mac = info.mac.clone();
            }
            if bridge.description.is_empty() {
                bridge.description = DEFAULT_BRIDGE_DESCRIPTION.to_string();
            }
        }
    }

    tracing::debug!(count = bridges.len(), "Listed LXD bridges");
    Ok(bridges)
}

fn bridge_from(entry: &Value) -> Option<NetworkInterfaceInfo> {
    let name = entry.get("name")?.as_str()?;
    let kind = entry.get("type")?.as_str()?;

    if name.is_empty() || kind != "bridge" {
        return None;
    }

    Some(NetworkInterfaceInfo {
        id: name.to_string(),
        kind: kind.to_string(),
        description: entry
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        mac: None,
    })
}
