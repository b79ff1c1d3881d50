//! Maps observed runtime state to the user-visible pod status.

use crate::error::SyncError;
use crate::manager::DockerManager;
use crate::runtime::{ContainerRuntimeState, ContainerStatus, DOCKER_ID_PREFIX, PodStatus};
use anyhow::Result;
use common::{ApiContainerStatus, ApiPodStatus, ContainerState, Pod};
use std::collections::{HashMap, HashSet};

fn container_status_to_api(status: &ContainerStatus) -> ApiContainerStatus {
    let state = match status.state {
        ContainerRuntimeState::Running => Some(ContainerState::Running {
            started_at: status.started_at,
        }),
        ContainerRuntimeState::Exited => Some(ContainerState::Terminated {
            exit_code: status.exit_code,
            signal: None,
            reason: status.reason.clone(),
            message: status.message.clone(),
            started_at: status.started_at,
            finished_at: status.finished_at,
        }),
        ContainerRuntimeState::Unknown => Some(ContainerState::Waiting {
            reason: None,
            message: None,
        }),
    };
    ApiContainerStatus {
        name: status.name.clone(),
        state,
        last_termination_state: None,
        restart_count: status.restart_count,
        image: status.image.clone(),
        image_id: status.image_id.clone(),
        container_id: Some(format!("{DOCKER_ID_PREFIX}{}", status.id)),
    }
}

fn is_image_or_run_failure(reason: &str) -> bool {
    reason == SyncError::ImagePullBackOff.reason()
        || reason == SyncError::ImageInspect.reason()
        || reason == SyncError::ImagePull.reason()
        || reason == SyncError::ImageNeverPull.reason()
        || reason == SyncError::RunContainer.reason()
}

impl DockerManager {
    /// Observed status plus reason-cache overlay, in the user-visible shape.
    pub async fn get_api_pod_status(&self, pod: &Pod) -> Result<ApiPodStatus> {
        let runtime_status = self
            .get_pod_status(
                &pod.metadata.uid,
                &pod.metadata.name,
                &pod.metadata.namespace,
            )
            .await?;
        Ok(self.convert_pod_status_to_api_pod_status(pod, &runtime_status))
    }

    pub fn convert_pod_status_to_api_pod_status(
        &self,
        pod: &Pod,
        runtime_status: &PodStatus,
    ) -> ApiPodStatus {
        let uid = &pod.metadata.uid;
        let mut api_status = ApiPodStatus {
            pod_ip: runtime_status.ip.clone(),
            container_statuses: Vec::new(),
        };

        let expected: HashSet<&str> = pod
            .spec
            .containers
            .iter()
            .map(|c| c.name.as_str())
            .collect();

        // Newest record per container becomes the current state; the second
        // newest becomes the last termination state. Anything older is
        // ignored, as is the infra container.
        let mut statuses: HashMap<String, ApiContainerStatus> = HashMap::new();
        let mut container_done: HashSet<String> = HashSet::new();
        for status in &runtime_status.container_statuses {
            if !expected.contains(status.name.as_str()) || container_done.contains(&status.name) {
                continue;
            }
            let converted = container_status_to_api(status);
            match statuses.get_mut(&status.name) {
                Some(existing) => {
                    existing.last_termination_state = converted.state;
                    container_done.insert(status.name.clone());
                }
                None => {
                    statuses.insert(status.name.clone(), converted);
                }
            }
        }

        // Old user-visible statuses back-fill what container GC erased.
        let old_statuses: HashMap<&str, &ApiContainerStatus> = pod
            .status
            .container_statuses
            .iter()
            .map(|s| (s.name.as_str(), s))
            .collect();

        for container in &pod.spec.containers {
            if let Some(status) = statuses.get_mut(&container.name) {
                // A dead container held in crash-loop backoff presents as
                // waiting, with its former state demoted to last-termination.
                if let Some(info) = self.reason_cache.get(uid, &container.name) {
                    if info.reason == SyncError::CrashLoopBackOff.reason() {
                        status.last_termination_state = status.state.clone();
                        status.state = Some(ContainerState::Waiting {
                            reason: Some(info.reason),
                            message: Some(info.message),
                        });
                    }
                }
                continue;
            }

            // No active or dead record for this container.
            let mut status = ApiContainerStatus {
                name: container.name.clone(),
                image: container.image.clone(),
                ..Default::default()
            };
            if let Some(old) = old_statuses.get(container.name.as_str()) {
                status.restart_count = old.restart_count;
                status.last_termination_state = old.last_termination_state.clone();
            }
            match self.reason_cache.get(uid, &container.name) {
                None => {
                    // Nothing recorded yet; the container is on its way.
                    status.state = Some(ContainerState::Waiting {
                        reason: Some("ContainerCreating".to_string()),
                        message: Some(format!(
                            "Image: {} is ready, container is creating",
                            container.image
                        )),
                    });
                }
                Some(info) if is_image_or_run_failure(&info.reason) => {
                    // Reason and message are filled from the cache below.
                    status.state = Some(ContainerState::Waiting {
                        reason: None,
                        message: None,
                    });
                }
                Some(_) => {}
            }
            statuses.insert(container.name.clone(), status);
        }

        let mut container_statuses: Vec<ApiContainerStatus> = statuses.into_values().collect();
        for status in &mut container_statuses {
            if let Some(ContainerState::Waiting { reason, message }) = &mut status.state {
                if let Some(info) = self.reason_cache.get(uid, &status.name) {
                    *reason = Some(info.reason);
                    *message = Some(info.message);
                }
            }
        }

        // Deterministic order for clients diffing the list.
        container_statuses.sort_by(|a, b| a.name.cmp(&b.name));
        api_status.container_statuses = container_statuses;
        api_status
    }
}
