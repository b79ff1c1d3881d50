//! Pod and container termination.
//!
//! Workload containers of a pod die in parallel; only after every one of
//! them has terminated does the network get torn down and the infra
//! container stopped. A single kill resolves the grace period, runs the
//! pre-stop hook under that deadline, clamps what remains and only then
//! issues the stop.

use crate::client::DockerError;
use crate::config::MINIMUM_GRACE_PERIOD_SECONDS;
use crate::error::SyncError;
use crate::events::{self, EventType};
use crate::labels::container_and_pod_from_labels;
use crate::manager::{DockerManager, short_id};
use crate::names::{POD_INFRA_CONTAINER_NAME, build_pod_full_name};
use crate::network::NAMESPACE_MODE_HOST;
use crate::result::{PodSyncResult, SyncAction, SyncResult};
use crate::runtime::{RunningContainer, RunningPod};
use anyhow::{Result, bail};
use common::{ContainerSpec, Pod};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

impl DockerManager {
    /// Kills every container of the pod, then tears down its network.
    ///
    /// `pod` may be `None` after a node-agent restart; per-container kill
    /// semantics are then reconstructed from daemon labels.
    pub async fn kill_pod(self: &Arc<Self>, pod: Option<&Pod>, running_pod: RunningPod) -> Result<()> {
        let result = self.kill_pod_with_sync_result(pod, running_pod).await;
        match result.error() {
            Some(message) => bail!(message),
            None => Ok(()),
        }
    }

    pub(crate) async fn kill_pod_with_sync_result(
        self: &Arc<Self>,
        pod: Option<&Pod>,
        running_pod: RunningPod,
    ) -> PodSyncResult {
        let mut result = PodSyncResult::default();

        // The kills may each take up to a full grace period; fan out and
        // collect their outcomes through a bounded channel.
        let (tx, mut rx) =
            tokio::sync::mpsc::channel::<SyncResult>(running_pod.containers.len().max(1));
        let mut network_container: Option<RunningContainer> = None;
        let mut network_spec: Option<ContainerSpec> = None;

        for container in &running_pod.containers {
            let spec = pod
                .and_then(|p| p.container_by_name(&container.name))
                .cloned();
            if container.name == POD_INFRA_CONTAINER_NAME {
                // The infra container goes last so pre-stop hooks can still
                // use the pod's network namespace.
                network_container = Some(container.clone());
                network_spec = spec;
                continue;
            }

            let manager = Arc::clone(self);
            let pod_owned = pod.cloned();
            let container = container.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut kill_result =
                    SyncResult::new(SyncAction::KillContainer, container.name.clone());
                if let Err(e) = manager
                    .kill_container_in_pod(
                        &container.id,
                        spec.as_ref(),
                        pod_owned.as_ref(),
                        "Need to kill pod.",
                    )
                    .await
                {
                    kill_result.fail(SyncError::KillContainer, e.to_string());
                    error!(
                        container_id = %container.id,
                        container_name = %container.name,
                        error = %e,
                        "failed to kill container"
                    );
                }
                let _ = tx.send(kill_result).await;
            });
        }
        drop(tx);
        while let Some(kill_result) = rx.recv().await {
            result.add_sync_result(kill_result);
        }

        let Some(network_container) = network_container else {
            return result;
        };

        let details = match self.client.inspect_container(&network_container.id).await {
            Ok(details) => details,
            Err(e) => {
                error!(
                    container_id = %network_container.id,
                    error = %e,
                    "failed to inspect infra container before teardown"
                );
                return result;
            }
        };

        let host_network = details
            .host_config
            .as_ref()
            .map(|h| h.network_mode == NAMESPACE_MODE_HOST)
            .unwrap_or(false);
        if !host_network {
            let pod_full_name = build_pod_full_name(&running_pod.name, &running_pod.namespace);
            let mut teardown_result =
                SyncResult::new(SyncAction::TeardownNetwork, pod_full_name);
            if let Err(e) = self
                .network_plugin
                .tear_down_pod(
                    &running_pod.namespace,
                    &running_pod.name,
                    &network_container.id,
                )
                .await
            {
                let message = format!(
                    "Failed to teardown network for pod {:?} using network plugin {:?}: {e}",
                    running_pod.uid,
                    self.network_plugin.name()
                );
                teardown_result.fail(SyncError::TeardownNetwork, message.clone());
                error!("{message}");
            }
            result.add_sync_result(teardown_result);
        }

        let mut kill_result =
            SyncResult::new(SyncAction::KillContainer, network_container.name.clone());
        if let Err(e) = self
            .kill_container_in_pod(
                &network_container.id,
                network_spec.as_ref(),
                pod,
                "Need to kill pod.",
            )
            .await
        {
            kill_result.fail(SyncError::KillContainer, e.to_string());
            error!(
                container_id = %network_container.id,
                error = %e,
                "failed to kill infra container"
            );
        }
        result.add_sync_result(kill_result);
        result
    }

    /// Kills a single container, recovering spec and pod from daemon labels
    /// when the caller no longer has them.
    pub async fn kill_container_in_pod(
        &self,
        container_id: &str,
        container: Option<&ContainerSpec>,
        pod: Option<&Pod>,
        reason: &str,
    ) -> Result<()> {
        let (container_owned, pod_owned) = if container.is_none() || pod.is_none() {
            let details = self.client.inspect_container(container_id).await?;
            let (label_pod, label_container) = container_and_pod_from_labels(&details);
            (
                container.cloned().or(label_container),
                pod.cloned().or(label_pod),
            )
        } else {
            (container.cloned(), pod.cloned())
        };
        self.kill_container(
            container_id,
            container_owned.as_ref(),
            pod_owned.as_ref(),
            reason,
        )
        .await
    }

    async fn kill_container(
        &self,
        container_id: &str,
        container: Option<&ContainerSpec>,
        pod: Option<&Pod>,
        reason: &str,
    ) -> Result<()> {
        let mut container_display_str = container_id.to_string();
        if let Some(container) = container {
            container_display_str = format!("{container_display_str} {}", container.name);
        }
        if let Some(pod) = pod {
            container_display_str = format!("{container_display_str} {}/{}", pod.metadata.namespace, pod.metadata.name);
        }

        let mut grace_period = MINIMUM_GRACE_PERIOD_SECONDS;
        if let Some(pod) = pod {
            if let Some(seconds) = pod.metadata.deletion_grace_period_seconds {
                grace_period = seconds;
            } else if let Some(seconds) = pod.spec.termination_grace_period_seconds {
                grace_period = seconds;
            }
        }
        info!(container = %container_display_str, grace_period, "killing container");
        let start = tokio::time::Instant::now();

        if let (Some(pod), Some(container)) = (pod, container) {
            if let Some(pre_stop) = container
                .lifecycle
                .as_ref()
                .and_then(|l| l.pre_stop.as_ref())
            {
                debug!(container = %container_display_str, "running pre-stop hook");
                let runner = self.hook_runner.clone();
                let hook_pod = pod.clone();
                let hook_container = container.clone();
                let handler = pre_stop.clone();
                let hook_id = container_id.to_string();
                let hook_display = container_display_str.clone();
                let hook = tokio::spawn(async move {
                    if let Err(e) = runner
                        .run(&hook_id, &hook_pod, &hook_container, &handler)
                        .await
                    {
                        error!(container = %hook_display, error = %e, "pre-stop hook failed");
                    }
                });

                let deadline = Duration::from_secs(grace_period.max(0) as u64);
                // On deadline the hook task is abandoned, not cancelled; it
                // may finish in the background and is only logged.
                if tokio::time::timeout(deadline, hook).await.is_err() {
                    info!(
                        container = %container_display_str,
                        grace_period,
                        "pre-stop hook did not complete before the deadline"
                    );
                } else {
                    debug!(container = %container_display_str, "pre-stop hook completed");
                }
                grace_period -= start.elapsed().as_secs() as i64;
            }
        }

        // Always leave a minimal shutdown window between SIGTERM and
        // SIGKILL, no matter how much the hook consumed.
        if grace_period < MINIMUM_GRACE_PERIOD_SECONDS {
            grace_period = MINIMUM_GRACE_PERIOD_SECONDS;
        }

        let stop_result = match self
            .client
            .stop_container(container_id, grace_period as u32)
            .await
        {
            Err(DockerError::ContainerNotRunning { .. }) => {
                debug!(container = %container_display_str, "container has already exited");
                Ok(())
            }
            Err(e) => Err(e),
            Ok(()) => Ok(()),
        };
        match &stop_result {
            Ok(()) => {
                info!(container = %container_display_str, elapsed = ?start.elapsed(), "container exited")
            }
            Err(e) => {
                info!(container = %container_display_str, elapsed = ?start.elapsed(), error = %e, "container termination failed")
            }
        }

        // Event and ref cleanup happen whether or not the stop succeeded.
        match self.container_ref_manager.get_ref(container_id) {
            None => warn!(container = %container_display_str, "no ref for container"),
            Some(reference) => {
                let mut message =
                    format!("Killing container with id {}", short_id(container_id));
                if !reason.is_empty() {
                    message = format!("{message}: {reason}");
                }
                self.recorder.event(
                    &reference,
                    EventType::Normal,
                    events::KILLING_CONTAINER,
                    message,
                );
                self.container_ref_manager.clear_ref(container_id);
            }
        }

        stop_result.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    #[tokio::test]
    async fn kill_pod_stops_workloads_then_network_then_infra() {
        let fixture = Fixture::new().await;
        let pod = make_pod(
            "web",
            "uid-1",
            vec![make_container("app"), make_container("sidecar")],
        );
        fixture.docker.add_running_infra(&pod, "10.0.0.1");
        fixture.docker.add_running_container(&pod, "app");
        fixture.docker.add_running_container(&pod, "sidecar");
        let running = fixture.running_pod("uid-1", "web").await;

        let result = fixture
            .manager
            .kill_pod_with_sync_result(Some(&pod), running)
            .await;
        assert!(result.error().is_none());

        // Two parallel workload kills, one teardown, one infra kill.
        let kills: Vec<_> = result
            .sync_results
            .iter()
            .filter(|r| r.action == SyncAction::KillContainer)
            .collect();
        assert_eq!(kills.len(), 3);
        assert_eq!(
            kills.last().unwrap().target,
            POD_INFRA_CONTAINER_NAME,
            "infra container must be killed last"
        );
        assert!(
            result
                .sync_results
                .iter()
                .any(|r| r.action == SyncAction::TeardownNetwork)
        );

        // Network teardown was ordered after the workload stops and before
        // the infra stop.
        let timeline = fixture.timeline();
        let teardown = timeline
            .iter()
            .position(|e| e.starts_with("teardown:"))
            .unwrap();
        let infra_stop = timeline
            .iter()
            .position(|e| e == &format!("stop:{POD_INFRA_CONTAINER_NAME}"))
            .unwrap();
        let workload_stops: Vec<usize> = timeline
            .iter()
            .enumerate()
            .filter(|(_, e)| *e == "stop:app" || *e == "stop:sidecar")
            .map(|(i, _)| i)
            .collect();
        assert_eq!(workload_stops.len(), 2);
        assert!(workload_stops.iter().all(|&i| i < teardown));
        assert!(teardown < infra_stop);
        assert!(fixture.docker.all_stopped());
    }

    #[tokio::test]
    async fn host_network_pod_skips_teardown() {
        let fixture = Fixture::new().await;
        let pod = make_pod("web", "uid-1", vec![make_container("app")]);
        let infra_id = fixture.docker.add_running_infra(&pod, "10.0.0.1");
        fixture.docker.mutate_container(&infra_id, |details| {
            if let Some(hc) = details.host_config.as_mut() {
                hc.network_mode = NAMESPACE_MODE_HOST.to_string();
            }
        });
        fixture.docker.add_running_container(&pod, "app");
        let running = fixture.running_pod("uid-1", "web").await;

        let result = fixture
            .manager
            .kill_pod_with_sync_result(Some(&pod), running)
            .await;
        assert!(result.error().is_none());
        assert!(
            !fixture
                .network
                .calls()
                .iter()
                .any(|c| c.starts_with("teardown:"))
        );
        assert!(
            !result
                .sync_results
                .iter()
                .any(|r| r.action == SyncAction::TeardownNetwork)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pre_stop_hook_runs_before_stop() {
        let fixture = Fixture::new().await;
        let mut container = make_container("app");
        container.lifecycle = Some(make_exec_pre_stop());
        let pod = make_pod("web", "uid-1", vec![container.clone()]);
        let id = fixture.docker.add_running_container(&pod, "app");

        fixture
            .manager
            .kill_container_in_pod(&id, Some(&container), Some(&pod), "test kill")
            .await
            .unwrap();

        let hook_calls = fixture.hooks.calls();
        assert_eq!(hook_calls.len(), 1);
        assert_eq!(hook_calls[0], id);
        assert!(fixture.docker.all_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_pre_stop_hook_is_abandoned_at_deadline() {
        let fixture = Fixture::new().await;
        let mut container = make_container("app");
        container.lifecycle = Some(make_exec_pre_stop());
        let mut pod = make_pod("web", "uid-1", vec![container.clone()]);
        pod.spec.termination_grace_period_seconds = Some(5);
        let id = fixture.docker.add_running_container(&pod, "app");

        // Hook sleeps far beyond the 5s grace period.
        fixture.hooks.set_delay(Duration::from_secs(30));

        let started = tokio::time::Instant::now();
        fixture
            .manager
            .kill_container_in_pod(&id, Some(&container), Some(&pod), "drain")
            .await
            .unwrap();
        let elapsed = started.elapsed();

        // The hook deadline consumed the 5 seconds; the stop itself then got
        // the clamped 2-second minimum as its daemon-side grace.
        assert!(elapsed >= Duration::from_secs(5));
        assert!(elapsed < Duration::from_secs(30));
        assert_eq!(fixture.docker.last_stop_grace(&id), Some(2));
    }

    #[tokio::test]
    async fn grace_period_prefers_deletion_over_spec() {
        let fixture = Fixture::new().await;
        let container = make_container("app");
        let mut pod = make_pod("web", "uid-1", vec![container.clone()]);
        pod.spec.termination_grace_period_seconds = Some(30);
        pod.metadata.deletion_grace_period_seconds = Some(7);
        let id = fixture.docker.add_running_container(&pod, "app");

        fixture
            .manager
            .kill_container_in_pod(&id, Some(&container), Some(&pod), "")
            .await
            .unwrap();
        assert_eq!(fixture.docker.last_stop_grace(&id), Some(7));
    }

    #[tokio::test]
    async fn stop_of_already_exited_container_is_not_an_error() {
        let fixture = Fixture::new().await;
        let pod = make_pod("web", "uid-1", vec![make_container("app")]);
        let id = fixture.docker.add_exited_container(&pod, "app", 0, true);

        fixture
            .manager
            .kill_container_in_pod(&id, Some(&pod.spec.containers[0]), Some(&pod), "")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn kill_clears_container_ref_and_emits_event() {
        let fixture = Fixture::new().await;
        let container = make_container("app");
        let pod = make_pod("web", "uid-1", vec![container.clone()]);
        let id = fixture.docker.add_running_container(&pod, "app");
        fixture.manager.container_ref_manager.set_ref(
            id.clone(),
            crate::events::generate_container_ref(&pod, &container),
        );

        fixture
            .manager
            .kill_container_in_pod(&id, Some(&container), Some(&pod), "scale down")
            .await
            .unwrap();

        assert!(fixture.manager.container_ref_manager.get_ref(&id).is_none());
        let killing = fixture.recorder.messages_for(events::KILLING_CONTAINER);
        assert_eq!(killing.len(), 1);
        assert!(killing[0].contains("scale down"));
    }

    #[tokio::test(start_paused = true)]
    async fn kill_without_spec_recovers_hook_from_labels() {
        // Node-agent restart case: the pod spec is gone, so the pre-stop
        // hook and grace period must come from the labels stamped at create
        // time.
        let fixture = Fixture::new().await;
        let mut container = make_container("app");
        container.lifecycle = Some(make_exec_pre_stop());
        let mut pod = make_pod("web", "uid-1", vec![container]);
        pod.spec.termination_grace_period_seconds = Some(10);
        fixture.docker.add_running_infra(&pod, "10.0.0.1");
        fixture.docker.add_running_container(&pod, "app");
        let running = fixture.running_pod("uid-1", "web").await;

        let result = fixture
            .manager
            .kill_pod_with_sync_result(None, running)
            .await;
        assert!(result.error().is_none());
        assert_eq!(fixture.hooks.calls().len(), 1, "pre-stop hook ran from labels");
        assert!(fixture.docker.all_stopped());
        // Teardown still happened on the way out.
        assert!(
            fixture
                .network
                .calls()
                .iter()
                .any(|c| c.starts_with("teardown:"))
        );
    }
}
