//! Creates and starts containers: config assembly, daemon create+start,
//! post-start duties (hooks, log symlink, OOM score, resolver tweak).

use crate::client::{ContainerConfig, CreateContainerOptions, HostConfig, PortBinding};
use crate::config::NDOTS_DNS_OPTION;
use crate::error::SyncError;
use crate::events::{self, EventType, ObjectReference, generate_container_ref};
use crate::labels::new_labels;
use crate::manager::{DockerManager, get_ipc_mode, get_pid_mode, short_id};
use crate::names::{DockerName, POD_INFRA_CONTAINER_NAME, build_docker_name, build_pod_full_name};
use crate::network::{NAMESPACE_MODE_HOST, plugin_disables_docker_networking};
use crate::options::{Mount, PortMapping, RunContainerOptions};
use crate::qos::{POD_INFRA_OOM_ADJ, container_oom_score_adjust};
use crate::resources::{
    cpu_limit_millis, cpu_request_millis, memory_limit_bytes, milli_cpu_to_quota,
    milli_cpu_to_shares,
};
use anyhow::{Context, Result, anyhow, bail};
use common::{ContainerSpec, EnvVar, Pod};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const HOSTNAME_MAX_LEN: usize = 63;

pub(crate) fn make_env_list(envs: &[EnvVar]) -> Vec<String> {
    envs.iter()
        .map(|env| format!("{}={}", env.name, env.value))
        .collect()
}

/// `host:container[:ro][:Z]` bindings. Relabeling is only requested when the
/// pod provides an SELinux label; otherwise the volume would be locked to
/// the first container's random MCS label.
pub(crate) fn make_mount_bindings(mounts: &[Mount], pod_has_selinux_label: bool) -> Vec<String> {
    mounts
        .iter()
        .map(|m| {
            let mut bind = format!("{}:{}", m.host_path, m.container_path);
            if m.read_only {
                bind.push_str(":ro");
            }
            if m.selinux_relabel && pod_has_selinux_label {
                if m.read_only {
                    bind.push_str(",Z");
                } else {
                    bind.push_str(":Z");
                }
            }
            bind
        })
        .collect()
}

/// Exposed ports plus bindings keyed `"<port>/<proto>"`. Host ports binding
/// the same container port append in declaration order.
pub(crate) fn make_ports_and_bindings(
    port_mappings: &[PortMapping],
) -> (Vec<String>, HashMap<String, Vec<PortBinding>>) {
    let mut exposed_ports: Vec<String> = Vec::new();
    let mut port_bindings: HashMap<String, Vec<PortBinding>> = HashMap::new();
    for port in port_mappings {
        // No host port means nothing to bind.
        if port.host_port == 0 {
            continue;
        }
        let protocol = match port.protocol.to_uppercase().as_str() {
            "UDP" => "udp",
            "TCP" => "tcp",
            other => {
                warn!(protocol = other, "unknown protocol, defaulting to TCP");
                "tcp"
            }
        };
        let docker_port = format!("{}/{}", port.container_port, protocol);
        if !exposed_ports.contains(&docker_port) {
            exposed_ports.push(docker_port.clone());
        }
        port_bindings
            .entry(docker_port)
            .or_default()
            .push(PortBinding {
                host_port: port.host_port.to_string(),
                host_ip: port.host_ip.clone(),
            });
    }
    (exposed_ports, port_bindings)
}

/// Hostnames are capped at 63 bytes (64 with the terminating NUL).
pub(crate) fn truncate_hostname(name: &str) -> String {
    if name.len() <= HOSTNAME_MAX_LEN {
        return name.to_string();
    }
    let mut end = HOSTNAME_MAX_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

/// Stable per-pod log location: `<dir>/<podFullName>_<container>_<id>.log`.
pub(crate) fn log_symlink_path(
    dir: &Path,
    pod_full_name: &str,
    container_name: &str,
    container_id: &str,
) -> PathBuf {
    dir.join(format!("{pod_full_name}_{container_name}_{container_id}.log"))
}

async fn add_ndots_option(resolv_conf_path: &str) -> Result<()> {
    if resolv_conf_path.is_empty() {
        error!("resolver config path is empty");
        return Ok(());
    }
    if !Path::new(resolv_conf_path).exists() {
        bail!("resolver config path {resolv_conf_path:?} does not exist");
    }
    debug!(path = resolv_conf_path, "appending ndots option to resolver config");
    let mut file = tokio::fs::OpenOptions::new()
        .append(true)
        .open(resolv_conf_path)
        .await
        .with_context(|| format!("failed to open {resolv_conf_path:?} for append"))?;
    tokio::io::AsyncWriteExt::write_all(&mut file, NDOTS_DNS_OPTION.as_bytes())
        .await
        .with_context(|| format!("failed to update {resolv_conf_path:?}"))
}

fn get_uid_from_user(id: &str) -> &str {
    // The directive may be "uid" or "uid:gid".
    id.split(':').next().unwrap_or(id)
}

impl DockerManager {
    /// Rejects containers that would run as root despite asking not to.
    pub(crate) async fn verify_non_root(&self, container: &ContainerSpec) -> Result<()> {
        if let Some(run_as_user) = container
            .security_context
            .as_ref()
            .and_then(|sc| sc.run_as_user)
        {
            if run_as_user == 0 {
                bail!("container's runAsUser breaks non-root policy");
            }
            return Ok(());
        }

        let image_runs_as_root = self
            .is_image_root(&container.image)
            .await
            .map_err(|e| anyhow!("can't tell if image runs as root: {e}"))?;
        if image_runs_as_root {
            bail!("container has no runAsUser and image will run as root");
        }
        Ok(())
    }

    /// Whether the image's USER directive resolves to root. Non-numeric
    /// directives are rejected outright since they cannot be verified.
    async fn is_image_root(&self, image: &str) -> Result<bool> {
        let details = self.client.inspect_image(image).await?;
        let config = details
            .config
            .ok_or_else(|| anyhow!("unable to inspect image {image:?}, no config"))?;
        let user = get_uid_from_user(&config.user);
        if user.is_empty() {
            // No user directive means the image runs as root.
            return Ok(true);
        }
        let uid: i64 = user
            .parse()
            .map_err(|_| anyhow!("non-numeric user ({user}) is not allowed"))?;
        Ok(uid == 0)
    }

    /// Creates and starts one container via the daemon. Emits failure events
    /// but leaves reason-cache bookkeeping to the caller.
    #[allow(clippy::too_many_arguments)]
    async fn run_container(
        &self,
        pod: &Pod,
        container: &ContainerSpec,
        opts: &RunContainerOptions,
        reference: &ObjectReference,
        net_mode: &str,
        ipc_mode: &str,
        uts_mode: &str,
        pid_mode: &str,
        restart_count: i32,
    ) -> Result<String> {
        let docker_name = DockerName {
            pod_full_name: build_pod_full_name(&pod.metadata.name, &pod.metadata.namespace),
            pod_uid: pod.metadata.uid.clone(),
            container_name: container.name.clone(),
            attempt: restart_count.max(0) as u32,
        };
        let (_, full_name) = build_docker_name(&docker_name, container);

        let (exposed_ports, port_bindings) = make_ports_and_bindings(&opts.port_mappings);
        let labels = new_labels(container, pod, restart_count);

        let memory_limit = memory_limit_bytes(container)?;
        let cpu_request = cpu_request_millis(container)?;
        let cpu_limit = cpu_limit_millis(container)?;
        // A limit without a request means the request defaults to the limit.
        let cpu_shares = match (cpu_request, cpu_limit) {
            (None, Some(limit)) => milli_cpu_to_shares(limit),
            (request, _) => milli_cpu_to_shares(request.unwrap_or(0)),
        };

        let user = container
            .security_context
            .as_ref()
            .and_then(|sc| sc.run_as_user)
            .map(|uid| uid.to_string())
            .unwrap_or_default();

        let create_opts = CreateContainerOptions {
            name: full_name,
            config: ContainerConfig {
                hostname: truncate_hostname(&pod.metadata.name),
                image: container.image.clone(),
                env: make_env_list(&opts.envs),
                exposed_ports,
                entrypoint: container.command.clone(),
                cmd: container.args.clone(),
                working_dir: container.working_dir.clone().unwrap_or_default(),
                labels,
                open_stdin: container.stdin,
                stdin_once: container.stdin_once,
                tty: container.tty,
                user,
                memory: memory_limit,
                memory_swap: -1,
                cpu_shares,
            },
        };
        debug!(
            pod_name = %pod.metadata.name,
            container_name = %container.name,
            entrypoint = ?create_opts.config.entrypoint,
            cmd = ?create_opts.config.cmd,
            "creating container"
        );

        let id = match self.client.create_container(create_opts).await {
            Ok(id) => id,
            Err(e) => {
                self.recorder.event(
                    reference,
                    EventType::Warning,
                    events::FAILED_TO_CREATE_CONTAINER,
                    format!("Failed to create container with error: {e}"),
                );
                return Err(e.into());
            }
        };
        self.recorder.event(
            reference,
            EventType::Normal,
            events::CREATED_CONTAINER,
            format!("Created container with id {}", short_id(&id)),
        );

        let mut binds = make_mount_bindings(&opts.mounts, pod.has_se_linux_label());

        // The termination message file location depends on the container id,
        // so it is created and bound in here rather than by the caller.
        if let (Some(pod_container_dir), Some(termination_message_path)) =
            (&opts.pod_container_dir, &container.termination_message_path)
        {
            let container_log_path = pod_container_dir.join(&id);
            match tokio::fs::File::create(&container_log_path).await {
                Ok(_) => binds.push(format!(
                    "{}:{}",
                    container_log_path.display(),
                    termination_message_path
                )),
                Err(e) => error!(
                    path = %container_log_path.display(),
                    error = %e,
                    "failed to create termination-log file"
                ),
            }
        }

        let mut host_config = HostConfig {
            binds,
            port_bindings,
            network_mode: net_mode.to_string(),
            ipc_mode: ipc_mode.to_string(),
            uts_mode: uts_mode.to_string(),
            pid_mode: pid_mode.to_string(),
            dns: opts.dns.clone(),
            dns_search: opts.dns_search.clone(),
            cgroup_parent: opts.cgroup_parent.clone(),
            memory: memory_limit,
            memory_swap: -1,
            cpu_shares,
            cpu_quota: 0,
            cpu_period: 0,
        };
        if self.config.cpu_cfs_quota {
            let (quota, period) = milli_cpu_to_quota(cpu_limit.unwrap_or(0));
            host_config.cpu_quota = quota;
            host_config.cpu_period = period;
        }

        if let Err(e) = self.client.start_container(&id, host_config).await {
            self.recorder.event(
                reference,
                EventType::Warning,
                events::FAILED_TO_START_CONTAINER,
                format!(
                    "Failed to start container with id {} with error: {e}",
                    short_id(&id)
                ),
            );
            return Err(e.into());
        }
        self.recorder.event(
            reference,
            EventType::Normal,
            events::STARTED_CONTAINER,
            format!("Started container with id {}", short_id(&id)),
        );

        Ok(id)
    }

    /// Runs a single container of a pod, including every post-start duty.
    pub(crate) async fn run_container_in_pod(
        self: &Arc<Self>,
        pod: &Pod,
        container: &ContainerSpec,
        net_mode: &str,
        ipc_mode: &str,
        pid_mode: &str,
        restart_count: i32,
    ) -> Result<String> {
        let reference = generate_container_ref(pod, container);
        let opts = self
            .runtime_helper
            .generate_run_container_options(pod, container)
            .await
            .context("failed to generate container options")?;

        let uts_mode = if pod.uses_host_network() {
            NAMESPACE_MODE_HOST
        } else {
            ""
        };
        let id = self
            .run_container(
                pod,
                container,
                &opts,
                &reference,
                net_mode,
                ipc_mode,
                uts_mode,
                pid_mode,
                restart_count,
            )
            .await?;

        // Remember the reference so later kills can attribute their events.
        self.container_ref_manager.set_ref(id.clone(), reference);

        if let Some(pre_start) = container
            .lifecycle
            .as_ref()
            .and_then(|l| l.pre_start.as_ref())
        {
            if let Err(hook_err) = self.hook_runner.run(&id, pod, container, pre_start).await {
                let err = anyhow!("pre-start hook: {hook_err}");
                if let Err(kill_err) = self
                    .kill_container_in_pod(&id, Some(container), Some(pod), &err.to_string())
                    .await
                {
                    warn!(
                        container_id = %id,
                        error = %kill_err,
                        "failed to kill container after pre-start hook failure"
                    );
                }
                return Err(err);
            }
        }

        // Symlink the daemon's json log to a stable per-pod name so cluster
        // logging can pick it up. Failure is logged, never fatal.
        let pod_full_name = build_pod_full_name(&pod.metadata.name, &pod.metadata.namespace);
        let container_log_file = self
            .docker_root
            .join("containers")
            .join(&id)
            .join(format!("{id}-json.log"));
        let symlink_file = log_symlink_path(
            &self.config.container_logs_dir,
            &pod_full_name,
            &container.name,
            &id,
        );
        if let Err(e) = std::os::unix::fs::symlink(&container_log_file, &symlink_file) {
            error!(
                pod_name = %pod.metadata.name,
                container_name = %container.name,
                error = %e,
                "failed to create symbolic link to container log"
            );
        }

        let details = self
            .client
            .inspect_container(&id)
            .await
            .context("failed to inspect container after start")?;
        if details.state.pid == 0 {
            bail!("can't get init PID for container {id:?}");
        }

        // Lower-priority pods die first under memory pressure; the infra
        // container is pinned near the top since losing it kills the pod.
        let oom_score_adj = if container.name == POD_INFRA_CONTAINER_NAME {
            POD_INFRA_OOM_ADJ
        } else {
            container_oom_score_adjust(container, self.config.memory_capacity_bytes)
        };
        let cgroup_name = self
            .proc_fs
            .get_full_container_name(details.state.pid)
            .context("failed to resolve container cgroup")?;
        self.oom_adjuster
            .apply_oom_score_adj_container(&cgroup_name, oom_score_adj, 5)
            .context("failed to apply oom score")?;

        // The resolver file is shared by every container of the pod and is
        // touched exactly once, right after the infra container appears.
        if container.name == POD_INFRA_CONTAINER_NAME && uts_mode != NAMESPACE_MODE_HOST {
            add_ndots_option(&details.resolv_conf_path).await?;
        }

        info!(
            pod_name = %pod.metadata.name,
            container_name = %container.name,
            container_id = %short_id(&id),
            "started container"
        );
        Ok(id)
    }

    /// Creates and starts the infra container, returning its id. Failures
    /// come back as `(reason, message)` so the caller can record them in a
    /// sync result directly.
    pub(crate) async fn create_pod_infra_container(
        self: &Arc<Self>,
        pod: &Pod,
    ) -> Result<String, (SyncError, String)> {
        let mut net_namespace = String::new();
        if plugin_disables_docker_networking(self.network_plugin.name()) {
            // The plugin provisions connectivity; keep the daemon out of it.
            net_namespace = "none".to_string();
        }
        if pod.uses_host_network() {
            net_namespace = NAMESPACE_MODE_HOST.to_string();
        }

        let container = self.expected_pod_infra_container(pod);

        // No pull secrets for the infra image.
        self.image_puller
            .pull_image(pod, &container, &[])
            .await
            .map_err(|failure| (failure.error, failure.message))?;

        self.run_container_in_pod(
            pod,
            &container,
            &net_namespace,
            &get_ipc_mode(pod),
            &get_pid_mode(pod),
            0,
        )
        .await
        .map_err(|e| (SyncError::RunContainer, e.to_string()))
    }
}
