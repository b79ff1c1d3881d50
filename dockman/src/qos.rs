//! OOM score policy derived from a container's memory QoS class.
//!
//! Lower-priority containers are sacrificed first when the node runs out of
//! memory. The infra container sits just above the node agent itself, since
//! killing it takes the whole pod down.

use crate::resources::{memory_limit_bytes, memory_request_bytes};
use common::ContainerSpec;

/// Adjustment for the pod infrastructure container.
pub const POD_INFRA_OOM_ADJ: i32 = -999;

const GUARANTEED_OOM_SCORE_ADJ: i32 = -998;
const BEST_EFFORT_OOM_SCORE_ADJ: i32 = 1000;

fn is_memory_best_effort(container: &ContainerSpec) -> bool {
    memory_request_bytes(container).unwrap_or(0) == 0
}

fn is_memory_guaranteed(container: &ContainerSpec) -> bool {
    let request = memory_request_bytes(container).unwrap_or(0);
    let limit = memory_limit_bytes(container).unwrap_or(0);
    limit != 0 && request == limit
}

/// Computes the oom_score_adj for a workload container.
///
/// Best-effort containers are first to die; guaranteed containers are nearly
/// unkillable; burstable containers scale inversely with the fraction of
/// node memory they request, clamped so they stay strictly between the two
/// extremes.
pub fn container_oom_score_adjust(container: &ContainerSpec, memory_capacity: i64) -> i32 {
    if is_memory_best_effort(container) {
        return BEST_EFFORT_OOM_SCORE_ADJ;
    }
    if is_memory_guaranteed(container) {
        return GUARANTEED_OOM_SCORE_ADJ;
    }

    let request = memory_request_bytes(container).unwrap_or(0);
    let capacity = memory_capacity.max(1);
    let adjust = 1000 - (1000 * request) / capacity;
    if adjust < (1000 + GUARANTEED_OOM_SCORE_ADJ) as i64 {
        return 1000 + GUARANTEED_OOM_SCORE_ADJ;
    }
    if adjust == BEST_EFFORT_OOM_SCORE_ADJ as i64 {
        return BEST_EFFORT_OOM_SCORE_ADJ - 1;
    }
    adjust as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ResourceList, ResourceRequirements};

    const GIB: i64 = 1024 * 1024 * 1024;

    fn make_container(request: Option<&str>, limit: Option<&str>) -> ContainerSpec {
        ContainerSpec {
            name: "app".to_string(),
            image: "busybox".to_string(),
            resources: Some(ResourceRequirements {
                requests: request.map(|m| ResourceList {
                    cpu: None,
                    memory: Some(m.to_string()),
                }),
                limits: limit.map(|m| ResourceList {
                    cpu: None,
                    memory: Some(m.to_string()),
                }),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn best_effort_container_dies_first() {
        let container = make_container(None, None);
        assert_eq!(container_oom_score_adjust(&container, 8 * GIB), 1000);
    }

    #[test]
    fn guaranteed_container_is_protected() {
        let container = make_container(Some("1Gi"), Some("1Gi"));
        assert_eq!(container_oom_score_adjust(&container, 8 * GIB), -998);
    }

    #[test]
    fn burstable_scales_with_request_fraction() {
        let container = make_container(Some("4Gi"), Some("8Gi"));
        assert_eq!(container_oom_score_adjust(&container, 8 * GIB), 500);
    }

    #[test]
    fn burstable_never_reaches_best_effort_score() {
        // Tiny request relative to capacity would round to 1000.
        let container = make_container(Some("1Ki"), Some("1Gi"));
        assert_eq!(container_oom_score_adjust(&container, 1024 * GIB), 999);
    }

    #[test]
    fn burstable_never_undercuts_guaranteed_floor() {
        // Requesting nearly all node memory cannot beat guaranteed class.
        let container = make_container(Some("8Gi"), Some("16Gi"));
        assert_eq!(container_oom_score_adjust(&container, 8 * GIB), 2);
    }
}
