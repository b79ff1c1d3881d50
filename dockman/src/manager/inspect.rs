//! Reads daemon state and classifies it into observed pod status.

use crate::client::ContainerDetails;
use crate::error::SyncError;
use crate::manager::DockerManager;
use crate::names::{POD_INFRA_CONTAINER_NAME, parse_docker_name, parse_pod_full_name};
use crate::network::DEFAULT_PLUGIN_NAME;
use crate::runtime::{
    ContainerRuntimeState, ContainerStatus, DOCKER_ID_PREFIX, PodStatus, RunningContainer,
    RunningPod,
};
use anyhow::{Context, Result};
use crate::labels::get_container_info_from_labels;
use std::collections::HashMap;
use tracing::{debug, error};

impl DockerManager {
    /// Determines the pod IP from the infra container's daemon record,
    /// preferring the network plugin's answer when a real plugin is
    /// configured.
    pub(crate) async fn determine_container_ip(
        &self,
        pod_namespace: &str,
        pod_name: &str,
        details: &ContainerDetails,
    ) -> Option<String> {
        let mut result = details
            .network_settings
            .as_ref()
            .map(|n| n.ip_address.clone())
            .filter(|ip| !ip.is_empty());

        if self.network_plugin.name() != DEFAULT_PLUGIN_NAME {
            match self
                .network_plugin
                .status(pod_namespace, pod_name, &details.id)
                .await
            {
                Ok(Some(status)) => result = Some(status.ip.to_string()),
                Ok(None) => {}
                Err(e) => {
                    error!(
                        plugin = %self.network_plugin.name(),
                        pod_name,
                        error = %e,
                        "network plugin failed on the status hook"
                    );
                }
            }
        }
        result
    }

    /// Inspects a single container and classifies it into a
    /// [`ContainerStatus`]. Returns the pod IP alongside when the container
    /// is the running infra container.
    pub(crate) async fn inspect_container(
        &self,
        id: &str,
        pod_name: &str,
        pod_namespace: &str,
    ) -> Result<(ContainerStatus, Option<String>)> {
        let details = self.client.inspect_container(id).await?;
        let (docker_name, hash) = parse_docker_name(&details.name)
            .with_context(|| format!("unable to parse container name {:?}", details.name))?;
        let container_name = docker_name.container_name;
        let info = get_container_info_from_labels(&details.config.labels);

        let mut status = ContainerStatus {
            name: container_name.clone(),
            id: id.to_string(),
            state: ContainerRuntimeState::Unknown,
            created_at: details.created,
            started_at: None,
            finished_at: None,
            exit_code: details.state.exit_code,
            image: details.config.image.clone(),
            image_id: format!("{DOCKER_ID_PREFIX}{}", details.image),
            hash,
            restart_count: info.restart_count,
            reason: None,
            message: None,
        };

        if details.state.running {
            status.state = ContainerRuntimeState::Running;
            status.started_at = details.state.started_at;
            let ip = if container_name == POD_INFRA_CONTAINER_NAME {
                self.determine_container_ip(pod_namespace, pod_name, &details)
                    .await
            } else {
                None
            };
            return Ok((status, ip));
        }

        // Containers that have exited, or that failed to start at all.
        if details.state.finished_at.is_some() || details.state.exit_code != 0 {
            let mut message = if details.state.error.is_empty() {
                None
            } else {
                Some(details.state.error.clone())
            };
            let mut started_at = details.state.started_at;
            let mut finished_at = details.state.finished_at;

            // An application may exit 0 after being oom killed, so the oom
            // verdict takes precedence over the exit code.
            let reason = if details.state.oom_killed {
                "OOMKilled".to_string()
            } else if details.state.exit_code == 0 {
                "Completed".to_string()
            } else if details.state.finished_at.is_some() {
                "Error".to_string()
            } else {
                // Failed to start: anchor the timestamps to creation so they
                // are never reported as the epoch.
                started_at = details.created;
                finished_at = details.created;
                SyncError::ContainerCannotRun.reason()
            };

            if let Some(term_path) = &info.termination_message_path {
                if let Some(host_path) = details.volumes.get(term_path) {
                    message = Some(match tokio::fs::read_to_string(host_path).await {
                        Ok(contents) => contents,
                        Err(e) => {
                            format!("Error on reading termination-log {host_path}: {e}")
                        }
                    });
                }
            }

            status.state = ContainerRuntimeState::Exited;
            status.reason = Some(reason);
            status.message = message;
            status.started_at = started_at;
            status.finished_at = finished_at;
            return Ok((status, None));
        }

        // Created-but-never-started (or paused) containers stay Unknown.
        Ok((status, None))
    }

    /// Collects the observed status of one pod from the daemon, including
    /// exited containers.
    pub async fn get_pod_status(
        &self,
        uid: &str,
        name: &str,
        namespace: &str,
    ) -> Result<PodStatus> {
        let mut pod_status = PodStatus {
            uid: uid.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
            ip: None,
            container_statuses: Vec::new(),
        };

        // The daemon returns containers newest first; that ordering is what
        // makes "first record per name is current" hold downstream.
        let containers = self.client.list_containers(true).await?;
        for container in containers {
            let Some(container_name) = container.names.first() else {
                continue;
            };
            let Ok((docker_name, _)) = parse_docker_name(container_name) else {
                continue;
            };
            if docker_name.pod_uid != uid {
                continue;
            }

            let (status, ip) = self
                .inspect_container(&container.id, name, namespace)
                .await
                .with_context(|| format!("failed to inspect container {}", container.id))?;
            if let Some(ip) = ip {
                pod_status.ip = Some(ip);
            }
            pod_status.container_statuses.push(status);
        }

        Ok(pod_status)
    }

    /// Lists managed containers; foreign containers are skipped.
    pub async fn get_containers(&self, all: bool) -> Result<Vec<RunningContainer>> {
        let mut result = Vec::new();
        for container in self.client.list_containers(all).await? {
            match to_running_container(&container.id, &container.names) {
                Some(converted) => result.push(converted),
                None => debug!(id = %container.id, "skipping unmanaged container"),
            }
        }
        Ok(result)
    }

    /// Lists managed containers grouped into pods.
    pub async fn get_pods(&self, all: bool) -> Result<Vec<RunningPod>> {
        let mut pods: HashMap<String, RunningPod> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for container in self.client.list_containers(all).await? {
            let Some(first_name) = container.names.first() else {
                continue;
            };
            let Ok((docker_name, hash)) = parse_docker_name(first_name) else {
                debug!(id = %container.id, "skipping unmanaged container");
                continue;
            };
            let Ok((pod_name, pod_namespace)) = parse_pod_full_name(&docker_name.pod_full_name)
            else {
                error!(
                    id = %container.id,
                    full_name = %docker_name.pod_full_name,
                    "unable to parse pod full name"
                );
                continue;
            };

            let entry = pods.entry(docker_name.pod_uid.clone()).or_insert_with(|| {
                order.push(docker_name.pod_uid.clone());
                RunningPod {
                    uid: docker_name.pod_uid.clone(),
                    name: pod_name,
                    namespace: pod_namespace,
                    containers: Vec::new(),
                }
            });
            entry.containers.push(RunningContainer {
                id: container.id.clone(),
                name: docker_name.container_name,
                hash,
            });
        }

        Ok(order.into_iter().filter_map(|uid| pods.remove(&uid)).collect())
    }
}

fn to_running_container(id: &str, names: &[String]) -> Option<RunningContainer> {
    let first = names.first()?;
    let (docker_name, hash) = parse_docker_name(first).ok()?;
    Some(RunningContainer {
        id: id.to_string(),
        name: docker_name.container_name,
        hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use chrono::{TimeZone, Utc};
    use std::io::Write;

    #[tokio::test]
    async fn pod_status_classifies_running_and_exited() {
        let fixture = Fixture::new().await;
        let pod = make_pod(
            "web",
            "uid-1",
            vec![make_container("app"), make_container("sidecar")],
        );

        let infra_id = fixture.docker.add_running_infra(&pod, "10.1.2.3");
        let app_id = fixture.docker.add_running_container(&pod, "app");
        let dead_id = fixture
            .docker
            .add_exited_container(&pod, "sidecar", 3, true);

        let status = fixture
            .manager
            .get_pod_status("uid-1", "web", "default")
            .await
            .unwrap();

        assert_eq!(status.ip.as_deref(), Some("10.1.2.3"));
        assert_eq!(status.container_statuses.len(), 3);

        let infra = status
            .container_status_by_name(POD_INFRA_CONTAINER_NAME)
            .unwrap();
        assert_eq!(infra.id, infra_id);
        assert_eq!(infra.state, ContainerRuntimeState::Running);

        let app = status.container_status_by_name("app").unwrap();
        assert_eq!(app.id, app_id);
        assert!(app.is_running());

        let dead = status.container_status_by_name("sidecar").unwrap();
        assert_eq!(dead.id, dead_id);
        assert_eq!(dead.state, ContainerRuntimeState::Exited);
        assert_eq!(dead.exit_code, 3);
        assert_eq!(dead.reason.as_deref(), Some("Error"));
    }

    #[tokio::test]
    async fn containers_of_other_pods_are_ignored() {
        let fixture = Fixture::new().await;
        let pod = make_pod("web", "uid-1", vec![make_container("app")]);
        let other = make_pod("other", "uid-2", vec![make_container("app")]);
        fixture.docker.add_running_container(&pod, "app");
        fixture.docker.add_running_container(&other, "app");
        fixture.docker.add_foreign_container("some-db");

        let status = fixture
            .manager
            .get_pod_status("uid-1", "web", "default")
            .await
            .unwrap();
        assert_eq!(status.container_statuses.len(), 1);
    }

    #[tokio::test]
    async fn oom_killed_beats_exit_code() {
        let fixture = Fixture::new().await;
        let pod = make_pod("web", "uid-1", vec![make_container("app")]);
        let id = fixture.docker.add_exited_container(&pod, "app", 0, true);
        fixture.docker.mutate_container(&id, |details| {
            details.state.oom_killed = true;
        });

        let status = fixture
            .manager
            .get_pod_status("uid-1", "web", "default")
            .await
            .unwrap();
        let app = status.container_status_by_name("app").unwrap();
        assert_eq!(app.reason.as_deref(), Some("OOMKilled"));
    }

    #[tokio::test]
    async fn clean_exit_reports_completed() {
        let fixture = Fixture::new().await;
        let pod = make_pod("web", "uid-1", vec![make_container("app")]);
        fixture.docker.add_exited_container(&pod, "app", 0, true);

        let status = fixture
            .manager
            .get_pod_status("uid-1", "web", "default")
            .await
            .unwrap();
        assert_eq!(
            status
                .container_status_by_name("app")
                .unwrap()
                .reason
                .as_deref(),
            Some("Completed")
        );
    }

    #[tokio::test]
    async fn failed_start_anchors_timestamps_to_creation() {
        let fixture = Fixture::new().await;
        let pod = make_pod("web", "uid-1", vec![make_container("app")]);
        let created = Utc.with_ymd_and_hms(2016, 3, 4, 12, 0, 0).unwrap();
        let id = fixture.docker.add_exited_container(&pod, "app", 6, false);
        fixture.docker.mutate_container(&id, |details| {
            details.created = Some(created);
            details.state.started_at = None;
            details.state.finished_at = None;
        });

        let status = fixture
            .manager
            .get_pod_status("uid-1", "web", "default")
            .await
            .unwrap();
        let app = status.container_status_by_name("app").unwrap();
        assert_eq!(app.reason.as_deref(), Some("ContainerCannotRun"));
        assert_eq!(app.started_at, Some(created));
        assert_eq!(app.finished_at, Some(created));
    }

    #[tokio::test]
    async fn termination_message_file_replaces_message() {
        let fixture = Fixture::new().await;
        let mut container = make_container("app");
        container.termination_message_path = Some("/dev/termination-log".to_string());
        let pod = make_pod("web", "uid-1", vec![container]);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "went away").unwrap();
        let id = fixture.docker.add_exited_container(&pod, "app", 1, true);
        let host_path = file.path().to_string_lossy().to_string();
        fixture.docker.mutate_container(&id, |details| {
            details
                .volumes
                .insert("/dev/termination-log".to_string(), host_path.clone());
        });

        let status = fixture
            .manager
            .get_pod_status("uid-1", "web", "default")
            .await
            .unwrap();
        let app = status.container_status_by_name("app").unwrap();
        assert_eq!(app.message.as_deref(), Some("went away\n"));
    }

    #[tokio::test]
    async fn unreadable_termination_message_becomes_diagnostic() {
        let fixture = Fixture::new().await;
        let mut container = make_container("app");
        container.termination_message_path = Some("/dev/termination-log".to_string());
        let pod = make_pod("web", "uid-1", vec![container]);

        let id = fixture.docker.add_exited_container(&pod, "app", 1, true);
        fixture.docker.mutate_container(&id, |details| {
            details.volumes.insert(
                "/dev/termination-log".to_string(),
                "/definitely/not/here".to_string(),
            );
        });

        let status = fixture
            .manager
            .get_pod_status("uid-1", "web", "default")
            .await
            .unwrap();
        let app = status.container_status_by_name("app").unwrap();
        assert!(
            app.message
                .as_deref()
                .unwrap()
                .starts_with("Error on reading termination-log")
        );
    }

    #[tokio::test]
    async fn get_pods_groups_by_uid() {
        let fixture = Fixture::new().await;
        let pod_a = make_pod("web", "uid-1", vec![make_container("app")]);
        let pod_b = make_pod("db", "uid-2", vec![make_container("store")]);
        fixture.docker.add_running_infra(&pod_a, "10.0.0.1");
        fixture.docker.add_running_container(&pod_a, "app");
        fixture.docker.add_running_container(&pod_b, "store");
        fixture.docker.add_foreign_container("bystander");

        let pods = fixture.manager.get_pods(true).await.unwrap();
        assert_eq!(pods.len(), 2);
        let web = pods.iter().find(|p| p.uid == "uid-1").unwrap();
        assert_eq!(web.name, "web");
        assert_eq!(web.containers.len(), 2);
        let db = pods.iter().find(|p| p.uid == "uid-2").unwrap();
        assert_eq!(db.containers.len(), 1);
    }

    #[tokio::test]
    async fn plugin_ip_wins_over_daemon_ip() {
        let mut fixture_builder = FixtureBuilder::new();
        fixture_builder.network_name = "cni".to_string();
        fixture_builder.network_ip = Some("172.16.0.9".parse().unwrap());
        let fixture = fixture_builder.build().await;

        let pod = make_pod("web", "uid-1", vec![make_container("app")]);
        fixture.docker.add_running_infra(&pod, "10.1.2.3");

        let status = fixture
            .manager
            .get_pod_status("uid-1", "web", "default")
            .await
            .unwrap();
        assert_eq!(status.ip.as_deref(), Some("172.16.0.9"));
    }

    #[tokio::test]
    async fn empty_daemon_yields_empty_listing() {
        let fixture = Fixture::new().await;
        let containers = fixture.manager.get_containers(true).await.unwrap();
        assert!(containers.is_empty());
        let pods = fixture.manager.get_pods(true).await.unwrap();
        assert!(pods.is_empty());
    }
}
