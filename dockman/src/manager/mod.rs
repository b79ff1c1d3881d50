//! The pod-to-container reconciler.
//!
//! [`DockerManager`] drives a set of daemon containers so that their
//! observed state converges to the declarative pod spec. The work is split
//! across submodules: `inspect` reads daemon state, `plan` computes the
//! minimal change set, `kill` and `launch` perform the mutations, `sync`
//! sequences them, `status` maps observed state to the user-visible form and
//! `exec` hosts the exec/attach/port-forward plumbing.

use crate::client::{
    DockerClient, DockerInfo, DockerVersionInfo, MINIMUM_DOCKER_API_VERSION, compare_api_versions,
};
use crate::config::{DEFAULT_DOCKER_ROOT, DockerManagerConfig};
use crate::events::{EventRecorder, RefManager};
use crate::hooks::HookRunner;
use crate::images::{ImagePuller, SerializedImagePuller, ThrottledImagePuller};
use crate::network::{NAMESPACE_MODE_HOST, NetworkPlugin};
use crate::oom::{OomAdjuster, ProcFs};
use crate::options::RuntimeHelper;
use crate::probe::LivenessManager;
use crate::reason_cache::ReasonCache;
use anyhow::{Result, bail};
use common::Pod;
use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod exec;
pub mod inspect;
pub mod kill;
pub mod launch;
pub mod plan;
pub mod status;
pub mod sync;

/// External collaborators the manager drives. All of them are trait objects
/// so embedders and tests can swap implementations freely.
pub struct DockerManagerDeps {
    pub client: Arc<dyn DockerClient>,
    pub recorder: Arc<dyn EventRecorder>,
    pub network_plugin: Arc<dyn NetworkPlugin>,
    pub liveness_manager: Arc<LivenessManager>,
    pub runtime_helper: Arc<dyn RuntimeHelper>,
    pub hook_runner: Arc<dyn HookRunner>,
    pub oom_adjuster: Arc<dyn OomAdjuster>,
    pub proc_fs: Arc<dyn ProcFs>,
}

pub struct DockerManager {
    pub(crate) client: Arc<dyn DockerClient>,
    pub(crate) recorder: Arc<dyn EventRecorder>,
    pub(crate) container_ref_manager: RefManager,
    pub(crate) network_plugin: Arc<dyn NetworkPlugin>,
    pub(crate) liveness_manager: Arc<LivenessManager>,
    pub(crate) runtime_helper: Arc<dyn RuntimeHelper>,
    pub(crate) hook_runner: Arc<dyn HookRunner>,
    pub(crate) oom_adjuster: Arc<dyn OomAdjuster>,
    pub(crate) proc_fs: Arc<dyn ProcFs>,
    pub(crate) image_puller: Arc<dyn ImagePuller>,
    pub(crate) reason_cache: ReasonCache,
    pub(crate) docker_root: PathBuf,
    pub(crate) config: DockerManagerConfig,
}

impl DockerManager {
    pub async fn new(deps: DockerManagerDeps, config: DockerManagerConfig) -> Self {
        // Work out the daemon storage root; per-container log files live
        // under it.
        let docker_root = match deps.client.info().await {
            Ok(info) => docker_root_from_info(&info),
            Err(e) => {
                error!(error = %e, "failed to query daemon info");
                warn!("using fallback {DEFAULT_DOCKER_ROOT} for the daemon storage root");
                PathBuf::from(DEFAULT_DOCKER_ROOT)
            }
        };
        info!(docker_root = %docker_root.display(), "resolved daemon storage root");

        let throttled = Arc::new(ThrottledImagePuller::new(
            deps.client.clone(),
            deps.recorder.clone(),
            config.image_pull_backoff_base,
            config.image_pull_backoff_max,
            config.pull_qps,
            config.pull_burst,
        ));
        let image_puller: Arc<dyn ImagePuller> = if config.serialize_image_pulls {
            Arc::new(SerializedImagePuller::new(throttled))
        } else {
            throttled
        };

        DockerManager {
            client: deps.client,
            recorder: deps.recorder,
            container_ref_manager: RefManager::new(),
            network_plugin: deps.network_plugin,
            liveness_manager: deps.liveness_manager,
            runtime_helper: deps.runtime_helper,
            hook_runner: deps.hook_runner,
            oom_adjuster: deps.oom_adjuster,
            proc_fs: deps.proc_fs,
            image_puller,
            reason_cache: ReasonCache::new(config.reason_cache_capacity),
            docker_root,
            config,
        }
    }

    pub async fn version(&self) -> Result<DockerVersionInfo> {
        Ok(self.client.version().await?)
    }

    /// Images in the daemon's local storage. Collection policy lives with
    /// the garbage collector, not here.
    pub async fn list_images(&self) -> Result<Vec<crate::client::ApiImage>> {
        Ok(self.client.list_images().await?)
    }

    pub async fn remove_image(&self, image: &str) -> Result<()> {
        Ok(self.client.remove_image(image).await?)
    }

    /// Checks that the daemon speaks at least the minimum supported API.
    pub async fn validate_version(&self) -> Result<()> {
        let version = self.client.version().await?;
        if compare_api_versions(&version.api_version, MINIMUM_DOCKER_API_VERSION)?
            == Ordering::Less
        {
            bail!(
                "daemon api version {} is below the supported minimum {}",
                version.api_version,
                MINIMUM_DOCKER_API_VERSION
            );
        }
        Ok(())
    }
}

/// Extracts the storage root from the daemon's driver status, discarding the
/// storage-driver suffix (`/var/lib/docker/aufs` -> `/var/lib/docker`).
pub(crate) fn docker_root_from_info(info: &DockerInfo) -> PathBuf {
    for (key, value) in &info.driver_status {
        if key == "Root Dir" {
            if let Some(parent) = std::path::Path::new(value).parent() {
                return parent.to_path_buf();
            }
        }
    }
    PathBuf::from(DEFAULT_DOCKER_ROOT)
}

pub(crate) fn get_pid_mode(pod: &Pod) -> String {
    match &pod.spec.security_context {
        Some(sc) if sc.host_pid => NAMESPACE_MODE_HOST.to_string(),
        _ => String::new(),
    }
}

pub(crate) fn get_ipc_mode(pod: &Pod) -> String {
    match &pod.spec.security_context {
        Some(sc) if sc.host_ipc => NAMESPACE_MODE_HOST.to_string(),
        _ => String::new(),
    }
}

/// Shortened container id for event and log texts.
pub(crate) fn short_id(id: &str) -> &str {
    &id[..id.len().min(12)]
}
