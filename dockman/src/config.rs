//! Manager configuration surface.

use std::path::PathBuf;
use std::time::Duration;

/// Grace floor applied to every stop so short grace periods still leave the
/// process a window between SIGTERM and SIGKILL.
pub const MINIMUM_GRACE_PERIOD_SECONDS: i64 = 2;

/// Appended once to the pod-shared resolver file right after the infra
/// container comes up, so short service names resolve as relative lookups.
pub const NDOTS_DNS_OPTION: &str = "options ndots:5\n";

/// Fallback daemon storage root when `Info()` does not reveal one.
pub const DEFAULT_DOCKER_ROOT: &str = "/var/lib/docker";

#[derive(Debug, Clone)]
pub struct DockerManagerConfig {
    /// Image used for the pod infrastructure container.
    pub pod_infra_container_image: String,
    /// Registry pull rate limit; zero disables throttling.
    pub pull_qps: f32,
    pub pull_burst: usize,
    /// Directory receiving the stable per-pod log symlinks.
    pub container_logs_dir: PathBuf,
    /// Enforce cpu limits with CFS quota in addition to shares.
    pub cpu_cfs_quota: bool,
    /// Funnel all image pulls through a single worker.
    pub serialize_image_pulls: bool,
    pub reason_cache_capacity: usize,
    /// Node memory capacity, used for OOM score policy.
    pub memory_capacity_bytes: i64,
    pub image_pull_backoff_base: Duration,
    pub image_pull_backoff_max: Duration,
}

impl Default for DockerManagerConfig {
    fn default() -> Self {
        DockerManagerConfig {
            pod_infra_container_image: "gcr.io/google_containers/pause:2.0".to_string(),
            pull_qps: 5.0,
            pull_burst: 10,
            container_logs_dir: PathBuf::from("/var/log/containers"),
            cpu_cfs_quota: false,
            serialize_image_pulls: true,
            reason_cache_capacity: 200,
            memory_capacity_bytes: 8 * 1024 * 1024 * 1024,
            image_pull_backoff_base: Duration::from_secs(10),
            image_pull_backoff_max: Duration::from_secs(300),
        }
    }
}
