//! lxdvm-check entry point.
//!
//! Verifies that the LXD daemon is reachable and trusts this host, creating
//! the project, default profile and bridge when they are missing, then
//! reports the daemon version and the bridges instances can attach to.
//!
//! Configuration comes from the `LXDVM_*` environment variables documented
//! on [`BackendConfig::from_env`]. Set `RUST_LOG=lxdvm_backend=debug` for
//! request-level detail.

use anyhow::Context;
use lxdvm_backend::{BackendConfig, VirtualMachineFactory};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so the report can be piped.
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("lxdvm_check=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = BackendConfig::from_env();
    tracing::info!(?config, "Configuration loaded");

    // Warn-only; the health check reports what actually matters.
    config.validate_warn();

    let factory = config.factory();

    factory
        .hypervisor_health_check()
        .await
        .context("LXD health check failed")?;
    tracing::info!(project = %config.project, bridge = %config.bridge, "LXD is ready");

    let version = factory
        .backend_version_string()
        .await
        .context("Could not read LXD version")?;
    println!("backend: {version}");

    let mut networks = factory
        .networks()
        .await
        .context("Could not list LXD networks")?;
    networks.sort_by(|a, b| a.id.cmp(&b.id));

    if networks.is_empty() {
        tracing::warn!("LXD reports no bridge networks");
    }
    for network in &networks {
        println!(
            "network: {} ({}){}",
            network.id,
            network.description,
            network
                .mac
                .as_deref()
                .map(|mac| format!(" mac {mac}"))
                .unwrap_or_default()
        );
    }

    Ok(())
}
