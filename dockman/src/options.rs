//! Per-container runtime options supplied by the embedding node agent.
//!
//! Volume resolution, DNS configuration and cgroup parent selection happen
//! above this crate; the launcher consumes their results verbatim.

use anyhow::Result;
use async_trait::async_trait;
use common::{ContainerSpec, Pod};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mount {
    pub name: String,
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
    /// Whether the volume wants an SELinux relabel; only honored when the
    /// pod carries an SELinux label.
    pub selinux_relabel: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortMapping {
    pub host_port: i32,
    pub container_port: i32,
    pub protocol: String,
    pub host_ip: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunContainerOptions {
    pub envs: Vec<common::EnvVar>,
    pub mounts: Vec<Mount>,
    pub port_mappings: Vec<PortMapping>,
    pub dns: Vec<String>,
    pub dns_search: Vec<String>,
    pub cgroup_parent: String,
    /// Host directory dedicated to this pod's containers; termination
    /// message files are created in here.
    pub pod_container_dir: Option<PathBuf>,
}

#[async_trait]
pub trait RuntimeHelper: Send + Sync {
    async fn generate_run_container_options(
        &self,
        pod: &Pod,
        container: &ContainerSpec,
    ) -> Result<RunContainerOptions>;
}

/// Direct projection of a container's declared ports, for helpers that do
/// not rewrite them.
pub fn make_port_mappings(container: &ContainerSpec) -> Vec<PortMapping> {
    container
        .ports
        .iter()
        .map(|p| PortMapping {
            host_port: p.host_port,
            container_port: p.container_port,
            protocol: p.protocol.clone(),
            host_ip: p.host_ip.clone(),
        })
        .collect()
}
