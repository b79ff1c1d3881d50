//! Pod and container metadata persisted as daemon labels.
//!
//! Labels are written at create time so that a container remains killable
//! with its declared semantics (pre-stop hook, grace period) even when the
//! manager restarts and no longer holds the pod spec. On kill, when the spec
//! is missing, labels are the source of truth.

use crate::client::ContainerDetails;
use common::{ContainerSpec, Pod};
use std::collections::HashMap;
use tracing::warn;

pub const POD_NAME_LABEL: &str = "io.kubernetes.pod.name";
pub const POD_NAMESPACE_LABEL: &str = "io.kubernetes.pod.namespace";
pub const POD_UID_LABEL: &str = "io.kubernetes.pod.uid";
/// Serialized pod body; written only when a pre-stop hook is declared.
pub const POD_DATA_LABEL: &str = "io.kubernetes.pod.data";
pub const POD_TERMINATION_GRACE_PERIOD_LABEL: &str = "io.kubernetes.pod.terminationGracePeriod";
pub const CONTAINER_NAME_LABEL: &str = "io.kubernetes.container.name";
pub const CONTAINER_RESTART_COUNT_LABEL: &str = "io.kubernetes.container.restartCount";
pub const CONTAINER_TERMINATION_MESSAGE_PATH_LABEL: &str =
    "io.kubernetes.container.terminationMessagePath";

/// Labels stamped onto a container at create time.
pub fn new_labels(
    container: &ContainerSpec,
    pod: &Pod,
    restart_count: i32,
) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    labels.insert(POD_NAME_LABEL.to_string(), pod.metadata.name.clone());
    labels.insert(
        POD_NAMESPACE_LABEL.to_string(),
        pod.metadata.namespace.clone(),
    );
    labels.insert(POD_UID_LABEL.to_string(), pod.metadata.uid.clone());
    labels.insert(CONTAINER_NAME_LABEL.to_string(), container.name.clone());
    labels.insert(
        CONTAINER_RESTART_COUNT_LABEL.to_string(),
        restart_count.to_string(),
    );
    if let Some(path) = &container.termination_message_path {
        labels.insert(
            CONTAINER_TERMINATION_MESSAGE_PATH_LABEL.to_string(),
            path.clone(),
        );
    }
    if let Some(grace) = pod.spec.termination_grace_period_seconds {
        labels.insert(
            POD_TERMINATION_GRACE_PERIOD_LABEL.to_string(),
            grace.to_string(),
        );
    }

    // The full pod body is only needed to honor pre-stop semantics after the
    // spec itself is gone; skip the expensive label otherwise.
    let has_pre_stop = container
        .lifecycle
        .as_ref()
        .and_then(|l| l.pre_stop.as_ref())
        .is_some();
    if has_pre_stop {
        match serde_json::to_string(pod) {
            Ok(body) => {
                labels.insert(POD_DATA_LABEL.to_string(), body);
            }
            Err(e) => {
                warn!(
                    pod_name = %pod.metadata.name,
                    error = %e,
                    "failed to serialize pod for pre-stop label"
                );
            }
        }
    }
    labels
}

/// Per-container metadata recovered from labels; every field is best-effort.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelledContainerInfo {
    pub pod_name: String,
    pub pod_namespace: String,
    pub pod_uid: String,
    pub name: String,
    pub restart_count: i32,
    pub termination_message_path: Option<String>,
}

pub fn get_container_info_from_labels(labels: &HashMap<String, String>) -> LabelledContainerInfo {
    LabelledContainerInfo {
        pod_name: labels.get(POD_NAME_LABEL).cloned().unwrap_or_default(),
        pod_namespace: labels.get(POD_NAMESPACE_LABEL).cloned().unwrap_or_default(),
        pod_uid: labels.get(POD_UID_LABEL).cloned().unwrap_or_default(),
        name: labels.get(CONTAINER_NAME_LABEL).cloned().unwrap_or_default(),
        restart_count: labels
            .get(CONTAINER_RESTART_COUNT_LABEL)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        termination_message_path: labels
            .get(CONTAINER_TERMINATION_MESSAGE_PATH_LABEL)
            .cloned(),
    }
}

/// Reconstructs the pod and container spec from a container's labels.
///
/// An empty label set means there is no pod information at all. A present
/// pod body that fails to decode, or that lacks the named container, yields
/// whatever could still be recovered; when no pod body exists but a grace
/// period label does, a stub pod carrying only the deletion grace period is
/// synthesized so the kill path can honor it.
pub fn container_and_pod_from_labels(
    details: &ContainerDetails,
) -> (Option<Pod>, Option<ContainerSpec>) {
    let labels = &details.config.labels;
    if labels.is_empty() {
        return (None, None);
    }

    let mut pod: Option<Pod> = None;
    let mut container: Option<ContainerSpec> = None;

    if let Some(body) = labels.get(POD_DATA_LABEL) {
        match serde_json::from_str::<Pod>(body) {
            Ok(decoded) => {
                let name = labels
                    .get(CONTAINER_NAME_LABEL)
                    .cloned()
                    .unwrap_or_default();
                container = decoded.container_by_name(&name).cloned();
                if container.is_none() {
                    warn!(
                        container_id = %details.id,
                        container_name = %name,
                        "container not found in pod recovered from labels"
                    );
                }
                pod = Some(decoded);
            }
            Err(e) => {
                warn!(container_id = %details.id, error = %e, "failed to decode pod label");
            }
        }
    }

    if pod.is_none() {
        if let Some(seconds) = labels
            .get(POD_TERMINATION_GRACE_PERIOD_LABEL)
            .and_then(|v| v.parse::<i64>().ok())
        {
            let mut stub = Pod {
                api_version: "v1".to_string(),
                kind: "Pod".to_string(),
                metadata: Default::default(),
                spec: Default::default(),
                status: Default::default(),
            };
            stub.metadata.deletion_grace_period_seconds = Some(seconds);
            pod = Some(stub);
        }
    }

    (pod, container)
}
