//! Interfaces to the host OOM and /proc machinery.
//!
//! The actual writers live outside this crate; the manager only decides the
//! score (see [`crate::qos`]) and the moment it is applied.

use anyhow::Result;

/// Applies oom_score_adj to every process of a cgroup.
pub trait OomAdjuster: Send + Sync {
    fn apply_oom_score_adj_container(
        &self,
        cgroup_name: &str,
        oom_score_adj: i32,
        max_tries: i32,
    ) -> Result<()>;
}

/// Resolves process information from the /proc mount.
pub trait ProcFs: Send + Sync {
    /// Full cgroup name of the container the pid belongs to.
    fn get_full_container_name(&self, pid: i32) -> Result<String>;
}
