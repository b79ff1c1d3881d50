//! Declarative pod and container API types shared between manifest producers
//! and the container manager.
//!
//! Everything here serializes with camelCase wire names so that manifests
//! written as YAML or JSON round-trip unchanged. Observed (runtime-level)
//! state lives in the manager crate; this crate only carries the desired
//! state plus the user-visible status representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    /// Set by the deletion flow; overrides the spec-level termination grace
    /// period when present.
    #[serde(rename = "deletionGracePeriodSeconds", default)]
    pub deletion_grace_period_seconds: Option<i64>,
}

fn default_namespace() -> String {
    "default".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    #[default]
    Always,
    OnFailure,
    Never,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullPolicy {
    Always,
    #[default]
    IfNotPresent,
    Never,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
    #[serde(rename = "restartPolicy", default)]
    pub restart_policy: RestartPolicy,
    #[serde(rename = "terminationGracePeriodSeconds", default)]
    pub termination_grace_period_seconds: Option<i64>,
    #[serde(rename = "securityContext", default)]
    pub security_context: Option<PodSecurityContext>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct PodSecurityContext {
    #[serde(rename = "hostNetwork", default)]
    pub host_network: bool,
    #[serde(rename = "hostPID", default)]
    pub host_pid: bool,
    #[serde(rename = "hostIPC", default)]
    pub host_ipc: bool,
    #[serde(rename = "seLinuxOptions", default)]
    pub se_linux_options: Option<SELinuxOptions>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct SELinuxOptions {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(rename = "type", default)]
    pub selinux_type: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub ports: Vec<ContainerPort>,
    #[serde(default)]
    pub resources: Option<ResourceRequirements>,
    #[serde(rename = "volumeMounts", default)]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(rename = "workingDir", default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub stdin: bool,
    #[serde(rename = "stdinOnce", default)]
    pub stdin_once: bool,
    #[serde(default)]
    pub tty: bool,
    #[serde(default)]
    pub lifecycle: Option<Lifecycle>,
    #[serde(rename = "terminationMessagePath", default)]
    pub termination_message_path: Option<String>,
    #[serde(rename = "securityContext", default)]
    pub security_context: Option<SecurityContext>,
    #[serde(rename = "imagePullPolicy", default)]
    pub image_pull_policy: PullPolicy,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ContainerPort {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "containerPort")]
    pub container_port: i32,
    #[serde(rename = "hostPort", default)]
    pub host_port: i32,
    #[serde(rename = "hostIP", default)]
    pub host_ip: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "TCP".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ResourceRequirements {
    #[serde(default)]
    pub limits: Option<ResourceList>,
    #[serde(default)]
    pub requests: Option<ResourceList>,
}

/// Quantities use the manifest notation: cpu as `"1"`, `"0.5"` or `"500m"`,
/// memory as bytes or `"Ki"`/`"Mi"`/`"Gi"` suffixed values.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ResourceList {
    #[serde(default)]
    pub cpu: Option<String>,
    #[serde(default)]
    pub memory: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct VolumeMount {
    pub name: String,
    #[serde(rename = "mountPath")]
    pub mount_path: String,
    #[serde(rename = "readOnly", default)]
    pub read_only: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Lifecycle {
    /// Runs right after the container has been created and started. A
    /// failure here kills the container and fails the start.
    #[serde(rename = "preStart", default)]
    pub pre_start: Option<Handler>,
    /// Runs before the container is stopped, bounded by the effective grace
    /// period.
    #[serde(rename = "preStop", default)]
    pub pre_stop: Option<Handler>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Handler {
    #[serde(default)]
    pub exec: Option<ExecAction>,
    #[serde(rename = "httpGet", default)]
    pub http_get: Option<HttpGetAction>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ExecAction {
    #[serde(default)]
    pub command: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct HttpGetAction {
    #[serde(default)]
    pub path: String,
    pub port: i32,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub scheme: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct SecurityContext {
    #[serde(default)]
    pub privileged: Option<bool>,
    #[serde(rename = "runAsUser", default)]
    pub run_as_user: Option<i64>,
    #[serde(rename = "runAsNonRoot", default)]
    pub run_as_non_root: Option<bool>,
    #[serde(rename = "seLinuxOptions", default)]
    pub se_linux_options: Option<SELinuxOptions>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Pod {
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
    #[serde(default)]
    pub status: ApiPodStatus,
}

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_kind() -> String {
    "Pod".to_string()
}

impl Pod {
    pub fn container_by_name(&self, name: &str) -> Option<&ContainerSpec> {
        self.spec.containers.iter().find(|c| c.name == name)
    }

    pub fn uses_host_network(&self) -> bool {
        self.spec
            .security_context
            .as_ref()
            .map(|sc| sc.host_network)
            .unwrap_or(false)
    }

    pub fn has_se_linux_label(&self) -> bool {
        self.spec
            .security_context
            .as_ref()
            .and_then(|sc| sc.se_linux_options.as_ref())
            .is_some()
    }
}

/// User-visible pod status, as reported upward after status conversion.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ApiPodStatus {
    #[serde(rename = "podIP", default)]
    pub pod_ip: Option<String>,
    #[serde(rename = "containerStatuses", default)]
    pub container_statuses: Vec<ApiContainerStatus>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ApiContainerStatus {
    pub name: String,
    #[serde(default)]
    pub state: Option<ContainerState>,
    #[serde(rename = "lastTerminationState", default)]
    pub last_termination_state: Option<ContainerState>,
    #[serde(rename = "restartCount", default)]
    pub restart_count: i32,
    #[serde(default)]
    pub image: String,
    #[serde(rename = "imageID", default)]
    pub image_id: String,
    #[serde(rename = "containerID", default)]
    pub container_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ContainerState {
    Waiting {
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    Running {
        #[serde(rename = "startedAt", default)]
        started_at: Option<DateTime<Utc>>,
    },
    Terminated {
        #[serde(rename = "exitCode")]
        exit_code: i32,
        #[serde(default)]
        signal: Option<i32>,
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        message: Option<String>,
        #[serde(rename = "startedAt", default)]
        started_at: Option<DateTime<Utc>>,
        #[serde(rename = "finishedAt", default)]
        finished_at: Option<DateTime<Utc>>,
    },
}
