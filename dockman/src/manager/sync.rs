//! The SyncPod driver: plans, kills, launches, accumulates results.

use crate::backoff::Backoff;
use crate::client::PullSecret;
use crate::error::SyncError;
use crate::events::{self, EventType, generate_container_ref, generate_pod_ref};
use crate::manager::{DockerManager, get_pid_mode};
use crate::names::{DockerName, POD_INFRA_CONTAINER_NAME, build_docker_name, build_pod_full_name};
use crate::result::{PodSyncResult, SyncAction, SyncResult};
use crate::runtime::{ContainerRuntimeState, PodStatus, running_pod_from_status};
use chrono::Utc;
use common::{ContainerSpec, Pod};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

impl DockerManager {
    /// Drives the running pod to match the desired spec. One invocation
    /// performs at most one pass of kills and starts; retries are the
    /// caller's job via periodic re-invocation.
    ///
    /// `restart_backoff` is caller-owned so crash-loop accounting survives
    /// across invocations. On infra (re)creation the discovered pod IP is
    /// written back into `pod.status`.
    pub async fn sync_pod(
        self: &Arc<Self>,
        pod: &mut Pod,
        pod_status: &PodStatus,
        pull_secrets: &[PullSecret],
        restart_backoff: &Backoff,
    ) -> PodSyncResult {
        let mut result = PodSyncResult::default();

        let container_changes = match self.compute_pod_container_changes(pod, pod_status).await {
            Ok(changes) => changes,
            Err(e) => {
                result.fail(e.to_string());
                return result;
            }
        };
        debug!(
            pod_name = %pod.metadata.name,
            changes = ?container_changes,
            "computed container changes"
        );

        if container_changes.infra_changed {
            self.recorder.event(
                &generate_pod_ref(pod),
                EventType::Normal,
                events::INFRA_CHANGED,
                "Pod infrastructure changed, it will be killed and re-created.".to_string(),
            );
        }

        if container_changes.start_infra_container
            || (container_changes.containers_to_keep.is_empty()
                && container_changes.containers_to_start.is_empty())
        {
            if container_changes.containers_to_keep.is_empty()
                && container_changes.containers_to_start.is_empty()
            {
                debug!(
                    pod_name = %pod.metadata.name,
                    "killing infra container since all other containers are dead"
                );
            } else {
                debug!(
                    pod_name = %pod.metadata.name,
                    "killing infra container, a new one will be started"
                );
            }
            let kill_result = self
                .kill_pod_with_sync_result(Some(&*pod), running_pod_from_status(pod_status))
                .await;
            let kill_failed = kill_result.error().is_some();
            result.add_pod_sync_result(kill_result);
            if kill_failed {
                return result;
            }
        } else {
            // Kill any running container not planned to be kept.
            for container_status in pod_status.running_container_statuses() {
                if container_changes
                    .containers_to_keep
                    .contains_key(&container_status.id)
                {
                    continue;
                }
                info!(
                    pod_name = %pod.metadata.name,
                    container_name = %container_status.name,
                    container_id = %container_status.id,
                    "killing unwanted container"
                );
                let mut pod_container = None;
                let mut kill_message = String::new();
                for (index, container) in pod.spec.containers.iter().enumerate() {
                    if container.name == container_status.name {
                        pod_container = Some(container);
                        kill_message = container_changes
                            .containers_to_start
                            .get(&index)
                            .cloned()
                            .unwrap_or_default();
                        break;
                    }
                }
                let mut kill_result =
                    SyncResult::new(SyncAction::KillContainer, container_status.name.clone());
                match self
                    .kill_container_in_pod(
                        &container_status.id,
                        pod_container,
                        Some(&*pod),
                        &kill_message,
                    )
                    .await
                {
                    Ok(()) => result.add_sync_result(kill_result),
                    Err(e) => {
                        kill_result.fail(SyncError::KillContainer, e.to_string());
                        result.add_sync_result(kill_result);
                        error!(
                            pod_name = %pod.metadata.name,
                            container_name = %container_status.name,
                            error = %e,
                            "error killing container"
                        );
                        return result;
                    }
                }
            }
        }

        // Infra container first; workload namespaces reference it.
        let mut pod_infra_container_id =
            container_changes.infra_container_id.clone().unwrap_or_default();
        if container_changes.start_infra_container
            && !container_changes.containers_to_start.is_empty()
        {
            debug!(pod_name = %pod.metadata.name, "creating infra container");
            let mut start_result =
                SyncResult::new(SyncAction::StartContainer, POD_INFRA_CONTAINER_NAME);
            match self.create_pod_infra_container(pod).await {
                Ok(id) => {
                    result.add_sync_result(start_result);
                    pod_infra_container_id = id;
                }
                Err((error, message)) => {
                    start_result.fail(error, message.clone());
                    result.add_sync_result(start_result);
                    error!(
                        pod_name = %pod.metadata.name,
                        error = %message,
                        "failed to create infra container"
                    );
                    return result;
                }
            }

            let pod_full_name = build_pod_full_name(&pod.metadata.name, &pod.metadata.namespace);
            let mut setup_result = SyncResult::new(SyncAction::SetupNetwork, pod_full_name);
            if !pod.uses_host_network() {
                if let Err(e) = self
                    .network_plugin
                    .set_up_pod(
                        &pod.metadata.namespace,
                        &pod.metadata.name,
                        &pod_infra_container_id,
                    )
                    .await
                {
                    let message = format!(
                        "Failed to setup network for pod {:?} using network plugin {:?}: {e}",
                        pod.metadata.name,
                        self.network_plugin.name()
                    );
                    setup_result.fail(SyncError::SetupNetwork, message.clone());
                    result.add_sync_result(setup_result);
                    error!("{message}");

                    // The freshly created sandbox is useless without a
                    // network; take it down again.
                    let mut kill_result =
                        SyncResult::new(SyncAction::KillContainer, POD_INFRA_CONTAINER_NAME);
                    if let Err(delete_err) = self
                        .kill_container_in_pod(&pod_infra_container_id, None, Some(&*pod), &message)
                        .await
                    {
                        kill_result.fail(SyncError::KillContainer, delete_err.to_string());
                        warn!(
                            pod_name = %pod.metadata.name,
                            error = %delete_err,
                            "failed to clear infra container"
                        );
                    }
                    result.add_sync_result(kill_result);
                    return result;
                }
            }
            result.add_sync_result(setup_result);

            let infra_details = match self.client.inspect_container(&pod_infra_container_id).await
            {
                Ok(details) => details,
                Err(e) => {
                    error!(
                        pod_name = %pod.metadata.name,
                        error = %e,
                        "failed to inspect infra container"
                    );
                    result.fail(e.to_string());
                    return result;
                }
            };
            if !pod.uses_host_network() {
                if let Err(e) =
                    crate::network::set_up_hairpin(infra_details.state.pid, "eth0").await
                {
                    warn!(
                        pod_name = %pod.metadata.name,
                        error = %e,
                        "hairpin setup failed"
                    );
                }
            }

            // Expose the IP right away so downward-API projections see it
            // without racing the next status poll.
            pod.status.pod_ip = self
                .determine_container_ip(&pod.metadata.namespace, &pod.metadata.name, &infra_details)
                .await;
        }

        // Start workload containers sequentially in spec order.
        for (&index, _start_reason) in &container_changes.containers_to_start {
            let container = &pod.spec.containers[index];
            let mut start_result =
                SyncResult::new(SyncAction::StartContainer, container.name.clone());

            // Restarts forced by infra recreation are config-driven, not
            // crash-driven; backoff does not apply to them.
            if !container_changes.start_infra_container {
                if let Some((error, message)) =
                    self.do_backoff(pod, container, pod_status, restart_backoff)
                {
                    start_result.fail(error, message);
                    result.add_sync_result(start_result);
                    debug!(
                        pod_name = %pod.metadata.name,
                        container_name = %container.name,
                        "backing off restarting container"
                    );
                    continue;
                }
            }

            debug!(
                pod_name = %pod.metadata.name,
                container_name = %container.name,
                "creating container"
            );
            if let Err(failure) = self
                .image_puller
                .pull_image(pod, container, pull_secrets)
                .await
            {
                start_result.fail(failure.error, failure.message.clone());
                result.add_sync_result(start_result);
                self.update_reason_cache(pod, container, &failure.error.reason(), &failure.message);
                continue;
            }

            if container
                .security_context
                .as_ref()
                .and_then(|sc| sc.run_as_non_root)
                .unwrap_or(false)
            {
                if let Err(e) = self.verify_non_root(container).await {
                    self.update_reason_cache(
                        pod,
                        container,
                        &SyncError::VerifyNonRoot.reason(),
                        &e.to_string(),
                    );
                    start_result.fail(SyncError::VerifyNonRoot, e.to_string());
                    result.add_sync_result(start_result);
                    error!(
                        pod_name = %pod.metadata.name,
                        container_name = %container.name,
                        error = %e,
                        "refusing to run container"
                    );
                    continue;
                }
            }

            let restart_count = pod_status
                .container_status_by_name(&container.name)
                .map(|status| status.restart_count + 1)
                .unwrap_or(0);

            // Anything configurable by namespace reference points at the
            // infra container; pid mode cannot, it only knows host or own.
            let namespace_mode = format!("container:{pod_infra_container_id}");
            match self
                .run_container_in_pod(
                    pod,
                    container,
                    &namespace_mode,
                    &namespace_mode,
                    &get_pid_mode(pod),
                    restart_count,
                )
                .await
            {
                Ok(_) => {
                    result.add_sync_result(start_result);
                    self.clear_reason_cache(pod, container);
                }
                Err(e) => {
                    self.update_reason_cache(
                        pod,
                        container,
                        &SyncError::RunContainer.reason(),
                        &e.to_string(),
                    );
                    start_result.fail(SyncError::RunContainer, e.to_string());
                    result.add_sync_result(start_result);
                    error!(
                        pod_name = %pod.metadata.name,
                        container_name = %container.name,
                        error = %e,
                        "error running container"
                    );
                    continue;
                }
            }
        }

        result
    }

    /// Crash-loop gate keyed by the stable container name. Returns the
    /// failure to record when the container is still inside its window.
    pub(crate) fn do_backoff(
        &self,
        pod: &Pod,
        container: &ContainerSpec,
        pod_status: &PodStatus,
        restart_backoff: &Backoff,
    ) -> Option<(SyncError, String)> {
        let exited_at = pod_status
            .container_status_by_name(&container.name)
            .filter(|status| status.state == ContainerRuntimeState::Exited)
            .and_then(|status| status.finished_at);

        if let Some(finished_at) = exited_at {
            let identity = DockerName {
                pod_full_name: build_pod_full_name(&pod.metadata.name, &pod.metadata.namespace),
                pod_uid: pod.metadata.uid.clone(),
                container_name: container.name.clone(),
                attempt: 0,
            };
            let (stable_name, _) = build_docker_name(&identity, container);
            let now = Utc::now();
            if restart_backoff.is_in_backoff_since(&stable_name, finished_at, now) {
                self.recorder.event(
                    &generate_container_ref(pod, container),
                    EventType::Warning,
                    events::BACK_OFF_START_CONTAINER,
                    "Back-off restarting failed container".to_string(),
                );
                let message = format!(
                    "Back-off {:?} restarting failed container={} pod={}",
                    restart_backoff.get(&stable_name),
                    container.name,
                    identity.pod_full_name,
                );
                self.update_reason_cache(
                    pod,
                    container,
                    &SyncError::CrashLoopBackOff.reason(),
                    &message,
                );
                info!("{message}");
                return Some((SyncError::CrashLoopBackOff, message));
            }
            restart_backoff.next(&stable_name, finished_at);
        }

        self.clear_reason_cache(pod, container);
        None
    }

    pub(crate) fn update_reason_cache(
        &self,
        pod: &Pod,
        container: &ContainerSpec,
        brief: &str,
        message: &str,
    ) {
        if brief.is_empty() {
            return;
        }
        self.reason_cache
            .put(&pod.metadata.uid, &container.name, brief, message);
    }

    pub(crate) fn clear_reason_cache(&self, pod: &Pod, container: &ContainerSpec) {
        self.reason_cache.remove(&pod.metadata.uid, &container.name);
    }
}
