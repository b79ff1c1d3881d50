//! Observed (daemon-level) pod and container state.
//!
//! These types describe what actually exists on the node, as opposed to the
//! declarative types in `common`. A container status record outlives the
//! container process: exited containers keep reporting here until their dead
//! records are garbage collected, which is what makes restart counting and
//! last-termination reporting possible.

use chrono::{DateTime, Utc};
use common::{ContainerSpec, Pod, RestartPolicy};

/// Prefix used when reporting daemon image ids upward.
pub const DOCKER_ID_PREFIX: &str = "docker://";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRuntimeState {
    Running,
    Exited,
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerStatus {
    pub name: String,
    /// Opaque daemon container id.
    pub id: String,
    pub state: ContainerRuntimeState,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: i32,
    pub image: String,
    pub image_id: String,
    /// Fingerprint of the spec the container was created from. Zero means
    /// the container predates fingerprint stamping and must be treated as
    /// unchanged.
    pub hash: u64,
    pub restart_count: i32,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl ContainerStatus {
    pub fn is_running(&self) -> bool {
        self.state == ContainerRuntimeState::Running
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PodStatus {
    pub uid: String,
    pub name: String,
    pub namespace: String,
    pub ip: Option<String>,
    /// Newest-first, mirroring the daemon listing order. The first record
    /// per container name is its current state.
    pub container_statuses: Vec<ContainerStatus>,
}

impl PodStatus {
    /// Latest status for the named container, relying on newest-first order.
    pub fn container_status_by_name(&self, name: &str) -> Option<&ContainerStatus> {
        self.container_statuses.iter().find(|s| s.name == name)
    }

    pub fn running_container_statuses(&self) -> Vec<&ContainerStatus> {
        self.container_statuses
            .iter()
            .filter(|s| s.is_running())
            .collect()
    }
}

/// A container as seen by the kill path: just enough identity to stop it.
#[derive(Debug, Clone, PartialEq)]
pub struct RunningContainer {
    pub id: String,
    pub name: String,
    pub hash: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunningPod {
    pub uid: String,
    pub name: String,
    pub namespace: String,
    pub containers: Vec<RunningContainer>,
}

impl RunningPod {
    pub fn container_by_name(&self, name: &str) -> Option<&RunningContainer> {
        self.containers.iter().find(|c| c.name == name)
    }
}

/// Projects the currently running containers of an observed status into the
/// shape the kill path consumes.
pub fn running_pod_from_status(status: &PodStatus) -> RunningPod {
    RunningPod {
        uid: status.uid.clone(),
        name: status.name.clone(),
        namespace: status.namespace.clone(),
        containers: status
            .running_container_statuses()
            .into_iter()
            .map(|s| RunningContainer {
                id: s.id.clone(),
                name: s.name.clone(),
                hash: s.hash,
            })
            .collect(),
    }
}

/// Restart-policy predicate for a dead container.
///
/// A container with no dead record at all is always eligible (it may simply
/// never have been created). With dead records, `Never` blocks the restart
/// and `OnFailure` blocks it only when the most recent run exited cleanly.
pub fn should_container_be_restarted(
    container: &ContainerSpec,
    pod: &Pod,
    pod_status: &PodStatus,
) -> bool {
    let dead: Vec<&ContainerStatus> = pod_status
        .container_statuses
        .iter()
        .filter(|s| s.name == container.name && s.state == ContainerRuntimeState::Exited)
        .collect();

    if !dead.is_empty() {
        match pod.spec.restart_policy {
            RestartPolicy::Never => return false,
            RestartPolicy::OnFailure => {
                // Newest record first; a clean exit means the work is done.
                if dead[0].exit_code == 0 {
                    return false;
                }
            }
            RestartPolicy::Always => {}
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ObjectMeta, PodSpec};

    fn make_status(name: &str, state: ContainerRuntimeState, exit_code: i32) -> ContainerStatus {
        ContainerStatus {
            name: name.to_string(),
            id: format!("{name}-id"),
            state,
            created_at: None,
            started_at: None,
            finished_at: None,
            exit_code,
            image: "busybox".to_string(),
            image_id: String::new(),
            hash: 0,
            restart_count: 0,
            reason: None,
            message: None,
        }
    }

    fn make_pod(policy: RestartPolicy) -> Pod {
        Pod {
            api_version: "v1".to_string(),
            kind: "Pod".to_string(),
            metadata: ObjectMeta {
                name: "pod".to_string(),
                namespace: "default".to_string(),
                uid: "uid-1".to_string(),
                ..Default::default()
            },
            spec: PodSpec {
                containers: vec![ContainerSpec {
                    name: "app".to_string(),
                    image: "busybox".to_string(),
                    ..Default::default()
                }],
                restart_policy: policy,
                ..Default::default()
            },
            status: Default::default(),
        }
    }

    #[test]
    fn restart_allowed_with_no_history() {
        let pod = make_pod(RestartPolicy::Never);
        let status = PodStatus::default();
        assert!(should_container_be_restarted(
            &pod.spec.containers[0],
            &pod,
            &status
        ));
    }

    #[test]
    fn restart_blocked_by_never_policy() {
        let pod = make_pod(RestartPolicy::Never);
        let status = PodStatus {
            container_statuses: vec![make_status("app", ContainerRuntimeState::Exited, 1)],
            ..Default::default()
        };
        assert!(!should_container_be_restarted(
            &pod.spec.containers[0],
            &pod,
            &status
        ));
    }

    #[test]
    fn on_failure_blocks_clean_exit_only() {
        let pod = make_pod(RestartPolicy::OnFailure);
        let clean = PodStatus {
            container_statuses: vec![make_status("app", ContainerRuntimeState::Exited, 0)],
            ..Default::default()
        };
        let dirty = PodStatus {
            container_statuses: vec![make_status("app", ContainerRuntimeState::Exited, 2)],
            ..Default::default()
        };
        assert!(!should_container_be_restarted(
            &pod.spec.containers[0],
            &pod,
            &clean
        ));
        assert!(should_container_be_restarted(
            &pod.spec.containers[0],
            &pod,
            &dirty
        ));
    }

    #[test]
    fn running_pod_projection_keeps_only_running_containers() {
        let status = PodStatus {
            uid: "uid-1".to_string(),
            name: "pod".to_string(),
            namespace: "default".to_string(),
            ip: Some("10.0.0.4".to_string()),
            container_statuses: vec![
                make_status("app", ContainerRuntimeState::Running, 0),
                make_status("old", ContainerRuntimeState::Exited, 1),
            ],
        };
        let running = running_pod_from_status(&status);
        assert_eq!(running.containers.len(), 1);
        assert_eq!(running.containers[0].name, "app");
    }

    #[test]
    fn newest_record_wins_name_lookup() {
        let mut newer = make_status("app", ContainerRuntimeState::Running, 0);
        newer.id = "new".to_string();
        let mut older = make_status("app", ContainerRuntimeState::Exited, 1);
        older.id = "old".to_string();
        let status = PodStatus {
            container_statuses: vec![newer, older],
            ..Default::default()
        };
        assert_eq!(status.container_status_by_name("app").unwrap().id, "new");
    }
}
