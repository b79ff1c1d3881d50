//! Computes the minimal change set to reconcile observed state to the spec.

use crate::hash::hash_container_spec;
use crate::manager::DockerManager;
use crate::names::POD_INFRA_CONTAINER_NAME;
use crate::network::NAMESPACE_MODE_HOST;
use crate::probe::ProbeResult;
use crate::runtime::{PodStatus, should_container_be_restarted};
use anyhow::Result;
use common::{ContainerSpec, Pod, PullPolicy, RestartPolicy};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// The plan for one pod. Invariants:
///
/// - `start_infra_container` implies `containers_to_keep` is empty.
/// - otherwise `infra_container_id` is set and keyed in
///   `containers_to_keep` with index -1.
/// - every running container absent from `containers_to_keep` gets killed.
/// - a kept infra container with nothing else to keep or start is dropped
///   from the map again; the caller then tears the whole pod down.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PodContainerChanges {
    pub start_infra_container: bool,
    pub infra_changed: bool,
    pub infra_container_id: Option<String>,
    /// Spec index -> human-readable reason; ordered so startup follows spec
    /// order deterministically.
    pub containers_to_start: BTreeMap<usize, String>,
    /// Container id -> spec index (-1 for the infra container).
    pub containers_to_keep: HashMap<String, i32>,
}

/// The infra container spec the pod is expected to run. Its fingerprint
/// covers the aggregated workload ports, so adding or removing a host port
/// forces an infra restart.
pub(crate) fn expected_infra_container(pod: &Pod, infra_image: &str) -> ContainerSpec {
    let ports = if pod.uses_host_network() {
        Vec::new()
    } else {
        // The daemon only exports ports from the infra container; collect
        // every workload port onto it.
        pod.spec
            .containers
            .iter()
            .flat_map(|c| c.ports.iter().cloned())
            .collect()
    };
    ContainerSpec {
        name: POD_INFRA_CONTAINER_NAME.to_string(),
        image: infra_image.to_string(),
        ports,
        image_pull_policy: PullPolicy::IfNotPresent,
        ..Default::default()
    }
}

impl DockerManager {
    pub(crate) fn expected_pod_infra_container(&self, pod: &Pod) -> ContainerSpec {
        expected_infra_container(pod, &self.config.pod_infra_container_image)
    }

    /// Whether the running infra container no longer matches what the pod
    /// needs (network mode or fingerprint drift).
    pub(crate) async fn pod_infra_container_changed(
        &self,
        pod: &Pod,
        infra_status: &crate::runtime::ContainerStatus,
    ) -> Result<bool> {
        let details = self.client.inspect_container(&infra_status.id).await?;
        let network_mode = details
            .host_config
            .as_ref()
            .map(|h| h.network_mode.as_str())
            .unwrap_or("");

        if pod.uses_host_network() && network_mode != NAMESPACE_MODE_HOST {
            debug!(
                pod_name = %pod.metadata.name,
                network_mode,
                "infra container is not on the host network"
            );
            return Ok(true);
        }

        let expected = self.expected_pod_infra_container(pod);
        Ok(infra_status.hash != hash_container_spec(&expected))
    }

    pub(crate) async fn compute_pod_container_changes(
        &self,
        pod: &Pod,
        pod_status: &PodStatus,
    ) -> Result<PodContainerChanges> {
        debug!(
            pod_name = %pod.metadata.name,
            pod_namespace = %pod.metadata.namespace,
            "computing container changes"
        );

        let mut containers_to_start: BTreeMap<usize, String> = BTreeMap::new();
        let mut containers_to_keep: HashMap<String, i32> = HashMap::new();

        let infra_status = pod_status.container_status_by_name(POD_INFRA_CONTAINER_NAME);
        let mut infra_changed = false;
        if let Some(status) = infra_status {
            if status.is_running() {
                infra_changed = self.pod_infra_container_changed(pod, status).await?;
            }
        }

        let mut start_infra_container = true;
        let mut infra_container_id = None;
        match infra_status {
            Some(status) if status.is_running() => {
                if infra_changed {
                    info!(
                        pod_name = %pod.metadata.name,
                        "infra container changed, pod will be restarted"
                    );
                } else {
                    start_infra_container = false;
                    infra_container_id = Some(status.id.clone());
                    containers_to_keep.insert(status.id.clone(), -1);
                }
            }
            _ => {
                debug!(
                    pod_name = %pod.metadata.name,
                    "infra container not found, pod will be (re)started"
                );
            }
        }

        for (index, container) in pod.spec.containers.iter().enumerate() {
            let expected_hash = hash_container_spec(container);
            let status = pod_status.container_status_by_name(&container.name);

            let Some(status) = status.filter(|s| s.is_running()) else {
                if should_container_be_restarted(container, pod, pod_status) {
                    let message = format!(
                        "Container {:?} is dead, but restart policy says it should be restarted.",
                        container.name
                    );
                    debug!(pod_name = %pod.metadata.name, "{message}");
                    containers_to_start.insert(index, message);
                }
                continue;
            };

            if start_infra_container {
                // Everything will be killed with the old sandbox anyway;
                // restart afterwards unless the policy forbids any restart.
                if pod.spec.restart_policy != RestartPolicy::Never {
                    let message = format!(
                        "Infra container is being recreated, {:?} will be restarted.",
                        container.name
                    );
                    info!(pod_name = %pod.metadata.name, "{message}");
                    containers_to_start.insert(index, message);
                }
                continue;
            }

            if status.hash != 0 && status.hash != expected_hash {
                let message = format!(
                    "Container {:?} hash changed ({} vs {}), it will be killed and re-created.",
                    container.name, status.hash, expected_hash
                );
                info!(pod_name = %pod.metadata.name, "{message}");
                containers_to_start.insert(index, message);
                continue;
            }

            match self.liveness_manager.get(&status.id) {
                None | Some(ProbeResult::Success) => {
                    containers_to_keep.insert(status.id.clone(), index as i32);
                }
                Some(ProbeResult::Failure) => {
                    if pod.spec.restart_policy != RestartPolicy::Never {
                        let message = format!(
                            "Container {:?} is unhealthy, it will be killed and re-created.",
                            container.name
                        );
                        info!(pod_name = %pod.metadata.name, "{message}");
                        containers_to_start.insert(index, message);
                    }
                    // With RestartPolicy::Never the container lands in
                    // neither map and is killed without replacement.
                }
            }
        }

        // A sandbox with nothing behind it is not worth keeping; dropping it
        // from the keep map routes the caller into the whole-pod teardown.
        if !start_infra_container
            && containers_to_start.is_empty()
            && containers_to_keep.len() == 1
        {
            containers_to_keep.clear();
        }

        Ok(PodContainerChanges {
            start_infra_container,
            infra_changed,
            infra_container_id,
            containers_to_start,
            containers_to_keep,
        })
    }
}
