//! The container daemon interface the manager drives.
//!
//! Only the operations the manager actually consumes are modeled. The
//! production implementation speaks the daemon's HTTP API; tests use the
//! in-memory fake. Errors the manager must react to structurally ("container
//! not running" on stop, "no such image" on inspect) get their own variants.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Daemon API version floor for the manager as a whole.
pub const MINIMUM_DOCKER_API_VERSION: &str = "1.18";

/// First daemon API version with native exec support.
pub const DOCKER_API_VERSION_WITH_EXEC: &str = "1.15";

#[derive(Debug, Error)]
pub enum DockerError {
    #[error("container {id} not running")]
    ContainerNotRunning { id: String },
    #[error("no such container: {id}")]
    NoSuchContainer { id: String },
    #[error("no such image: {image}")]
    NoSuchImage { image: String },
    #[error("daemon api error: {0}")]
    Api(String),
}

pub type DockerResult<T> = Result<T, DockerError>;

#[derive(Debug, Clone, Default)]
pub struct DockerInfo {
    /// Driver status pairs as reported by the daemon, e.g.
    /// `("Root Dir", "/var/lib/docker/aufs")`.
    pub driver_status: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct DockerVersionInfo {
    pub version: String,
    pub api_version: String,
}

/// A listing entry; inspect for full detail.
#[derive(Debug, Clone, Default)]
pub struct ApiContainer {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    pub created: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ContainerConfig {
    pub hostname: String,
    pub image: String,
    pub env: Vec<String>,
    /// Keys shaped `<port>/<proto>`, e.g. `8080/tcp`.
    pub exposed_ports: Vec<String>,
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub working_dir: String,
    pub labels: HashMap<String, String>,
    pub open_stdin: bool,
    pub stdin_once: bool,
    pub tty: bool,
    pub user: String,
    pub memory: i64,
    pub memory_swap: i64,
    pub cpu_shares: i64,
}

#[derive(Debug, Clone, Default)]
pub struct CreateContainerOptions {
    pub name: String,
    pub config: ContainerConfig,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortBinding {
    pub host_port: String,
    pub host_ip: String,
}

#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    pub binds: Vec<String>,
    pub port_bindings: HashMap<String, Vec<PortBinding>>,
    pub network_mode: String,
    pub ipc_mode: String,
    pub uts_mode: String,
    pub pid_mode: String,
    pub dns: Vec<String>,
    pub dns_search: Vec<String>,
    pub cgroup_parent: String,
    pub memory: i64,
    pub memory_swap: i64,
    pub cpu_shares: i64,
    pub cpu_quota: i64,
    pub cpu_period: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ContainerStateDetails {
    pub running: bool,
    pub pid: i32,
    pub exit_code: i32,
    pub oom_killed: bool,
    pub error: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct NetworkSettings {
    pub ip_address: String,
}

#[derive(Debug, Clone, Default)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub created: Option<DateTime<Utc>>,
    pub config: ContainerConfig,
    pub state: ContainerStateDetails,
    pub host_config: Option<HostConfig>,
    pub network_settings: Option<NetworkSettings>,
    /// Image id the container was created from.
    pub image: String,
    /// Container path -> host path for every mounted volume.
    pub volumes: HashMap<String, String>,
    pub resolv_conf_path: String,
}

#[derive(Debug, Clone, Default)]
pub struct ImageConfig {
    pub user: String,
}

#[derive(Debug, Clone, Default)]
pub struct ImageDetails {
    pub id: String,
    pub config: Option<ImageConfig>,
}

#[derive(Debug, Clone, Default)]
pub struct ApiImage {
    pub id: String,
    pub repo_tags: Vec<String>,
    pub size: i64,
}

#[derive(Debug, Clone, Default)]
pub struct PullSecret {
    pub registry: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default)]
pub struct LogsOptions {
    pub container: String,
    pub stdout: bool,
    pub stderr: bool,
    pub timestamps: bool,
    /// Unix timestamp; zero means from the beginning.
    pub since: i64,
    pub follow: bool,
    pub tail: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateExecOptions {
    pub container: String,
    pub cmd: Vec<String>,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub tty: bool,
}

#[derive(Debug, Clone, Default)]
pub struct StartExecOptions {
    pub detach: bool,
    pub tty: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ExecInspect {
    pub running: bool,
    pub exit_code: i32,
}

#[derive(Debug, Clone, Default)]
pub struct AttachOptions {
    pub container: String,
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
    pub stream: bool,
    pub logs: bool,
    pub raw_terminal: bool,
}

#[async_trait]
pub trait DockerClient: Send + Sync {
    async fn info(&self) -> DockerResult<DockerInfo>;
    async fn version(&self) -> DockerResult<DockerVersionInfo>;
    async fn list_containers(&self, all: bool) -> DockerResult<Vec<ApiContainer>>;
    async fn inspect_container(&self, id: &str) -> DockerResult<ContainerDetails>;
    /// Returns the new container id.
    async fn create_container(&self, opts: CreateContainerOptions) -> DockerResult<String>;
    async fn start_container(&self, id: &str, host_config: HostConfig) -> DockerResult<()>;
    async fn stop_container(&self, id: &str, grace_period_seconds: u32) -> DockerResult<()>;
    async fn logs(&self, opts: LogsOptions) -> DockerResult<Vec<u8>>;
    async fn create_exec(&self, opts: CreateExecOptions) -> DockerResult<String>;
    /// Runs the exec and returns the combined output captured so far.
    async fn start_exec(&self, exec_id: &str, opts: StartExecOptions) -> DockerResult<Vec<u8>>;
    async fn inspect_exec(&self, exec_id: &str) -> DockerResult<ExecInspect>;
    async fn attach_to_container(&self, opts: AttachOptions) -> DockerResult<Vec<u8>>;
    async fn inspect_image(&self, image: &str) -> DockerResult<ImageDetails>;
    async fn list_images(&self) -> DockerResult<Vec<ApiImage>>;
    async fn remove_image(&self, image: &str) -> DockerResult<()>;
    async fn pull_image(&self, image: &str, secrets: &[PullSecret]) -> DockerResult<()>;
}

/// Compares two dotted daemon API versions, e.g. `"1.18"` vs `"1.15"`.
pub fn compare_api_versions(a: &str, b: &str) -> anyhow::Result<std::cmp::Ordering> {
    let parse = |v: &str| -> anyhow::Result<Vec<u64>> {
        v.split('.')
            .map(|part| {
                part.parse::<u64>()
                    .map_err(|e| anyhow::anyhow!("invalid api version {v:?}: {e}"))
            })
            .collect()
    };
    let left = parse(a)?;
    let right = parse(b)?;
    let len = left.len().max(right.len());
    for i in 0..len {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        match l.cmp(&r) {
            std::cmp::Ordering::Equal => continue,
            other => return Ok(other),
        }
    }
    Ok(std::cmp::Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn api_version_comparison() {
        assert_eq!(
            compare_api_versions("1.18", "1.15").unwrap(),
            Ordering::Greater
        );
        assert_eq!(compare_api_versions("1.15", "1.15").unwrap(), Ordering::Equal);
        assert_eq!(compare_api_versions("1.9", "1.15").unwrap(), Ordering::Less);
        assert_eq!(compare_api_versions("1", "1.0").unwrap(), Ordering::Equal);
        assert!(compare_api_versions("banana", "1.0").is_err());
    }
}
