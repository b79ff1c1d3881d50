//! Network plugin interface and host-side network helpers.
//!
//! The plugin owns sandbox connectivity; the manager only sequences its
//! calls (set-up after infra start, teardown after workload stop) and asks
//! it for the pod IP. Plugins named `cni` or `kubenet` manage connectivity
//! themselves, so the infra container is created with daemon network mode
//! `none` for them.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::net::IpAddr;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

pub const DEFAULT_PLUGIN_NAME: &str = "kubernetes.io/no-op";
pub const CNI_PLUGIN_NAME: &str = "cni";
pub const KUBENET_PLUGIN_NAME: &str = "kubenet";

/// Daemon network mode value for host-mode namespaces.
pub const NAMESPACE_MODE_HOST: &str = "host";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PodNetworkStatus {
    pub ip: IpAddr,
}

#[async_trait]
pub trait NetworkPlugin: Send + Sync {
    fn name(&self) -> &str;
    async fn set_up_pod(&self, namespace: &str, name: &str, infra_container_id: &str) -> Result<()>;
    async fn tear_down_pod(
        &self,
        namespace: &str,
        name: &str,
        infra_container_id: &str,
    ) -> Result<()>;
    async fn status(
        &self,
        namespace: &str,
        name: &str,
        infra_container_id: &str,
    ) -> Result<Option<PodNetworkStatus>>;
}

/// Plugin used when no real plugin is configured; the daemon's own bridge
/// networking applies and the daemon-reported address is authoritative.
pub struct NoopNetworkPlugin;

#[async_trait]
impl NetworkPlugin for NoopNetworkPlugin {
    fn name(&self) -> &str {
        DEFAULT_PLUGIN_NAME
    }

    async fn set_up_pod(&self, _namespace: &str, _name: &str, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn tear_down_pod(&self, _namespace: &str, _name: &str, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn status(
        &self,
        _namespace: &str,
        _name: &str,
        _id: &str,
    ) -> Result<Option<PodNetworkStatus>> {
        Ok(None)
    }
}

/// Whether the infra container must be created with daemon networking
/// disabled because the plugin provisions connectivity itself.
pub fn plugin_disables_docker_networking(plugin_name: &str) -> bool {
    plugin_name == CNI_PLUGIN_NAME || plugin_name == KUBENET_PLUGIN_NAME
}

/// Enables hairpin mode on the host-side veth of a container interface, so
/// the pod can reach itself through a service address.
pub async fn set_up_hairpin(container_pid: i32, interface_name: &str) -> Result<()> {
    let peer_index = find_peer_ifindex(container_pid, interface_name).await?;
    let host_interface = find_interface_by_index(peer_index)
        .with_context(|| format!("no host interface with ifindex {peer_index}"))?;
    let mode_path = format!("/sys/devices/virtual/net/{host_interface}/brport/hairpin_mode");
    tokio::fs::write(&mode_path, "1")
        .await
        .with_context(|| format!("failed to enable hairpin mode via {mode_path}"))
}

async fn find_peer_ifindex(container_pid: i32, interface_name: &str) -> Result<u32> {
    let output = Command::new("nsenter")
        .args([
            "-t",
            &container_pid.to_string(),
            "-n",
            "--",
            "ethtool",
            "--statistics",
            interface_name,
        ])
        .output()
        .await
        .context("failed to run nsenter/ethtool for hairpin setup")?;
    if !output.status.success() {
        bail!(
            "ethtool --statistics {interface_name} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
    parse_peer_ifindex(&String::from_utf8_lossy(&output.stdout))
}

fn parse_peer_ifindex(statistics: &str) -> Result<u32> {
    for line in statistics.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("peer_ifindex:") {
            return value
                .trim()
                .parse::<u32>()
                .context("unparseable peer_ifindex value");
        }
    }
    bail!("peer_ifindex not reported by ethtool");
}

fn find_interface_by_index(ifindex: u32) -> Option<String> {
    let entries = std::fs::read_dir(Path::new("/sys/class/net")).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let index_path = entry.path().join("ifindex");
        if let Ok(contents) = std::fs::read_to_string(index_path) {
            if contents.trim().parse::<u32>().ok() == Some(ifindex) {
                debug!(ifindex, interface = %name, "resolved hairpin peer interface");
                return Some(name);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cni_and_kubenet_disable_daemon_networking() {
        assert!(plugin_disables_docker_networking(CNI_PLUGIN_NAME));
        assert!(plugin_disables_docker_networking(KUBENET_PLUGIN_NAME));
        assert!(!plugin_disables_docker_networking(DEFAULT_PLUGIN_NAME));
        assert!(!plugin_disables_docker_networking("flannel"));
    }

    #[test]
    fn parses_peer_ifindex_from_statistics() {
        let stats = "NIC statistics:\n     peer_ifindex: 7\n     rx_queue_0_packets: 12\n";
        assert_eq!(parse_peer_ifindex(stats).unwrap(), 7);
        assert!(parse_peer_ifindex("NIC statistics:\n").is_err());
    }
}
