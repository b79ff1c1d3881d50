//! Event attribution plumbing.
//!
//! The manager emits lifecycle events (created, started, killing, pull
//! failures, backoff) against an object reference describing the pod and
//! container. Recording backends live outside this crate; the ref map is
//! kept here because kill must be able to attribute events for containers
//! whose pod spec is no longer known.

use common::{ContainerSpec, Pod};
use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectReference {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub field_path: String,
}

pub trait EventRecorder: Send + Sync {
    fn event(&self, reference: &ObjectReference, event_type: EventType, reason: &str, message: String);
}

// Event reasons shared with external recorders.
pub const CREATED_CONTAINER: &str = "Created";
pub const STARTED_CONTAINER: &str = "Started";
pub const FAILED_TO_CREATE_CONTAINER: &str = "Failed";
pub const FAILED_TO_START_CONTAINER: &str = "Failed";
pub const KILLING_CONTAINER: &str = "Killing";
pub const PULLING_IMAGE: &str = "Pulling";
pub const PULLED_IMAGE: &str = "Pulled";
pub const FAILED_TO_PULL_IMAGE: &str = "Failed";
pub const FAILED_TO_INSPECT_IMAGE: &str = "InspectFailed";
pub const ERR_IMAGE_NEVER_PULL_POLICY: &str = "ErrImageNeverPull";
pub const BACK_OFF_PULL_IMAGE: &str = "BackOff";
pub const BACK_OFF_START_CONTAINER: &str = "BackOff";
pub const INFRA_CHANGED: &str = "InfraChanged";

pub fn generate_container_ref(pod: &Pod, container: &ContainerSpec) -> ObjectReference {
    ObjectReference {
        kind: "Pod".to_string(),
        namespace: pod.metadata.namespace.clone(),
        name: pod.metadata.name.clone(),
        uid: pod.metadata.uid.clone(),
        field_path: format!("spec.containers{{{}}}", container.name),
    }
}

pub fn generate_pod_ref(pod: &Pod) -> ObjectReference {
    ObjectReference {
        kind: "Pod".to_string(),
        namespace: pod.metadata.namespace.clone(),
        name: pod.metadata.name.clone(),
        uid: pod.metadata.uid.clone(),
        field_path: String::new(),
    }
}

/// Container id -> object reference, so events stay attributable between the
/// sync that created a container and the sync that kills it.
#[derive(Default)]
pub struct RefManager {
    refs: DashMap<String, ObjectReference>,
}

impl RefManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ref(&self, container_id: impl Into<String>, reference: ObjectReference) {
        self.refs.insert(container_id.into(), reference);
    }

    pub fn get_ref(&self, container_id: &str) -> Option<ObjectReference> {
        self.refs.get(container_id).map(|r| r.value().clone())
    }

    pub fn clear_ref(&self, container_id: &str) {
        self.refs.remove(container_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ObjectMeta, PodSpec};

    #[test]
    fn ref_manager_round_trip() {
        let manager = RefManager::new();
        let pod = Pod {
            api_version: "v1".to_string(),
            kind: "Pod".to_string(),
            metadata: ObjectMeta {
                name: "web".to_string(),
                namespace: "prod".to_string(),
                uid: "uid-1".to_string(),
                ..Default::default()
            },
            spec: PodSpec::default(),
            status: Default::default(),
        };
        let container = ContainerSpec {
            name: "app".to_string(),
            image: "busybox".to_string(),
            ..Default::default()
        };
        let reference = generate_container_ref(&pod, &container);
        assert_eq!(reference.field_path, "spec.containers{app}");

        manager.set_ref("c1", reference.clone());
        assert_eq!(manager.get_ref("c1"), Some(reference));
        manager.clear_ref("c1");
        assert!(manager.get_ref("c1").is_none());
    }
}
