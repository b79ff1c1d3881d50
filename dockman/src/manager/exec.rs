//! Command execution, attach, log access and port-forwarding against
//! managed containers.
//!
//! Exec prefers the daemon's native support (API >= 1.15) and falls back to
//! `nsinit` on older daemons. Port-forwarding runs `socat` inside the infra
//! container's network namespace via `nsenter`; missing host binaries are
//! reported as errors of that operation, never as manager failures.

use crate::client::{
    AttachOptions, CreateExecOptions, DOCKER_API_VERSION_WITH_EXEC, LogsOptions, StartExecOptions,
    compare_api_versions,
};
use crate::manager::DockerManager;
use crate::names::POD_INFRA_CONTAINER_NAME;
use crate::runtime::RunningPod;
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, info};

/// Poll cadence for exec completion. There is deliberately no default
/// timeout; callers wrap the future in their own deadline when they need
/// one.
const EXEC_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Options for reading a container's log.
#[derive(Debug, Clone, Default)]
pub struct ContainerLogOptions {
    pub follow: bool,
    pub timestamps: bool,
    pub since_seconds: Option<i64>,
    pub since_time: Option<DateTime<Utc>>,
    pub tail_lines: Option<i64>,
}

/// Pluggable exec backend for interactive sessions.
#[async_trait]
pub trait ExecHandler: Send + Sync {
    async fn exec_in_container(
        &self,
        client: Arc<dyn crate::client::DockerClient>,
        container: &crate::client::ContainerDetails,
        cmd: Vec<String>,
        tty: bool,
    ) -> Result<Vec<u8>>;
}

fn look_path(binary: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

impl DockerManager {
    /// Snapshot or stream of a container's log, straight from the daemon.
    pub async fn get_container_logs(
        &self,
        container_id: &str,
        options: &ContainerLogOptions,
    ) -> Result<Vec<u8>> {
        let mut since = 0;
        if let Some(seconds) = options.since_seconds {
            since = (Utc::now() - chrono::Duration::seconds(seconds)).timestamp();
        }
        if let Some(time) = options.since_time {
            since = time.timestamp();
        }
        let opts = LogsOptions {
            container: container_id.to_string(),
            stdout: true,
            stderr: true,
            timestamps: options.timestamps,
            since,
            follow: options.follow,
            tail: options.tail_lines.map(|lines| lines.to_string()),
        };
        Ok(self.client.logs(opts).await?)
    }

    pub(crate) async fn native_exec_support_exists(&self) -> Result<bool> {
        let version = self.client.version().await?;
        Ok(
            compare_api_versions(&version.api_version, DOCKER_API_VERSION_WITH_EXEC)?
                != Ordering::Less,
        )
    }

    async fn run_in_container_using_nsinit(
        &self,
        container_id: &str,
        cmd: &[String],
    ) -> Result<Vec<u8>> {
        let output = Command::new("/usr/sbin/nsinit")
            .arg("exec")
            .args(cmd)
            .current_dir(format!("/var/lib/docker/execdriver/native/{container_id}"))
            .output()
            .await
            .context("failed to spawn nsinit")?;
        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        Ok(combined)
    }

    /// Runs a command inside the container and returns its combined output.
    /// Completion is detected by polling the exec record every two seconds.
    pub async fn run_in_container(&self, container_id: &str, cmd: &[String]) -> Result<Vec<u8>> {
        if !self.native_exec_support_exists().await? {
            info!(container_id, "daemon has no native exec support, using nsinit");
            return self.run_in_container_using_nsinit(container_id, cmd).await;
        }

        let exec_id = self
            .client
            .create_exec(CreateExecOptions {
                container: container_id.to_string(),
                cmd: cmd.to_vec(),
                attach_stdin: false,
                attach_stdout: true,
                attach_stderr: true,
                tty: false,
            })
            .await
            .context("exec setup failed")?;
        let output = self
            .client
            .start_exec(&exec_id, StartExecOptions::default())
            .await?;

        let mut ticker = tokio::time::interval(EXEC_POLL_INTERVAL);
        ticker.tick().await;
        loop {
            let inspect = self.client.inspect_exec(&exec_id).await?;
            if !inspect.running {
                if inspect.exit_code != 0 {
                    debug!(exec_id, exit_code = inspect.exit_code, "exec finished non-zero");
                    bail!("error executing in container: {}", inspect.exit_code);
                }
                break;
            }
            ticker.tick().await;
        }
        Ok(output)
    }

    /// Interactive exec through the configured handler.
    pub async fn exec_in_container(
        &self,
        exec_handler: &dyn ExecHandler,
        container_id: &str,
        cmd: Vec<String>,
        tty: bool,
    ) -> Result<Vec<u8>> {
        let details = self.client.inspect_container(container_id).await?;
        if !details.state.running {
            bail!("container not running ({container_id})");
        }
        exec_handler
            .exec_in_container(self.client.clone(), &details, cmd, tty)
            .await
    }

    pub async fn attach_container(&self, container_id: &str, tty: bool) -> Result<Vec<u8>> {
        let opts = AttachOptions {
            container: container_id.to_string(),
            stdin: true,
            stdout: true,
            stderr: true,
            stream: true,
            logs: true,
            raw_terminal: tty,
        };
        Ok(self.client.attach_to_container(opts).await?)
    }

    /// Forwards a port by running socat inside the pod's network namespace,
    /// copying between the caller's stream and the target port.
    pub async fn port_forward<S>(&self, pod: &RunningPod, port: u16, stream: &mut S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let infra = pod
            .container_by_name(POD_INFRA_CONTAINER_NAME)
            .ok_or_else(|| {
                anyhow!(
                    "cannot find pod infra container in pod {}_{}",
                    pod.name,
                    pod.namespace
                )
            })?;
        let details = self.client.inspect_container(&infra.id).await?;
        if !details.state.running {
            bail!("container not running ({})", infra.id);
        }
        let container_pid = details.state.pid;

        let socat = look_path("socat")
            .ok_or_else(|| anyhow!("unable to do port forwarding: socat not found"))?;
        let nsenter = look_path("nsenter")
            .ok_or_else(|| anyhow!("unable to do port forwarding: nsenter not found"))?;

        debug!(container_pid, port, "starting port-forward via nsenter/socat");
        let mut child = Command::new(nsenter)
            .args([
                "-t",
                &container_pid.to_string(),
                "-n",
                &socat.to_string_lossy(),
                "-",
                &format!("TCP4:localhost:{port}"),
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to spawn port-forward command")?;

        let mut child_stdin = child.stdin.take().expect("stdin was piped");
        let mut child_stdout = child.stdout.take().expect("stdout was piped");

        let (mut read_half, mut write_half) = tokio::io::split(stream);
        // Half-close towards socat once the caller stops sending, so the
        // child can exit and the wait below returns.
        let inbound = async {
            let _ = tokio::io::copy(&mut read_half, &mut child_stdin).await;
            let _ = child_stdin.shutdown().await;
        };
        let outbound = async {
            let _ = tokio::io::copy(&mut child_stdout, &mut write_half).await;
        };
        tokio::join!(inbound, outbound);

        let status = child.wait().await.context("port-forward command failed")?;
        if !status.success() {
            bail!("port-forward command exited with {status}");
        }
        Ok(())
    }

    /// IP address of an interface inside the container's namespace.
    pub async fn get_container_ip(&self, container_id: &str, interface_name: &str) -> Result<String> {
        if look_path("nsenter").is_none() {
            bail!("unable to obtain IP address of container: missing nsenter");
        }
        let details = self.client.inspect_container(container_id).await?;
        if !details.state.running {
            bail!("container not running ({container_id})");
        }
        let extract = format!(
            "ip -4 addr show {interface_name} | grep inet | awk -F\" \" '{{print $2}}'"
        );
        let output = Command::new("nsenter")
            .args([
                "-t",
                &details.state.pid.to_string(),
                "-n",
                "--",
                "bash",
                "-c",
                &extract,
            ])
            .output()
            .await
            .context("failed to run nsenter")?;
        if !output.status.success() {
            bail!(
                "failed to read container ip: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Network namespace handle for the container's init process.
    pub async fn get_net_ns(&self, container_id: &str) -> Result<String> {
        let details = self.client.inspect_container(container_id).await?;
        Ok(format!("/proc/{}/ns/net", details.state.pid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ExecInspect;
    use crate::testutil::*;

    #[tokio::test]
    async fn native_exec_support_follows_api_version() {
        let fixture = Fixture::new().await;
        fixture.docker.set_api_version("1.18");
        assert!(fixture.manager.native_exec_support_exists().await.unwrap());
        fixture.docker.set_api_version("1.15");
        assert!(fixture.manager.native_exec_support_exists().await.unwrap());
        fixture.docker.set_api_version("1.14");
        assert!(!fixture.manager.native_exec_support_exists().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn run_in_container_polls_until_exec_finishes() {
        let fixture = Fixture::new().await;
        let pod = make_pod("web", "uid-1", vec![make_container("app")]);
        let id = fixture.docker.add_running_container(&pod, "app");
        fixture.docker.set_exec_output(b"hello\n".to_vec());
        // Two polls still running, then done.
        fixture.docker.queue_exec_states(vec![
            ExecInspect {
                running: true,
                exit_code: 0,
            },
            ExecInspect {
                running: true,
                exit_code: 0,
            },
            ExecInspect {
                running: false,
                exit_code: 0,
            },
        ]);

        let output = fixture
            .manager
            .run_in_container(&id, &["cat".to_string()])
            .await
            .unwrap();
        assert_eq!(output, b"hello\n");
        assert_eq!(fixture.docker.exec_inspect_count(), 3);
    }

    #[tokio::test]
    async fn run_in_container_propagates_exit_code() {
        let fixture = Fixture::new().await;
        let pod = make_pod("web", "uid-1", vec![make_container("app")]);
        let id = fixture.docker.add_running_container(&pod, "app");
        fixture.docker.queue_exec_states(vec![ExecInspect {
            running: false,
            exit_code: 3,
        }]);

        let err = fixture
            .manager
            .run_in_container(&id, &["false".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("3"));
    }

    #[tokio::test]
    async fn get_net_ns_uses_init_pid() {
        let fixture = Fixture::new().await;
        let pod = make_pod("web", "uid-1", vec![make_container("app")]);
        let id = fixture.docker.add_running_container(&pod, "app");
        let pid = fixture.docker.container(&id).unwrap().state.pid;
        assert_eq!(
            fixture.manager.get_net_ns(&id).await.unwrap(),
            format!("/proc/{pid}/ns/net")
        );
    }

    #[tokio::test]
    async fn port_forward_requires_infra_container() {
        let fixture = Fixture::new().await;
        let pod = RunningPod {
            uid: "uid-1".to_string(),
            name: "web".to_string(),
            namespace: "default".to_string(),
            containers: Vec::new(),
        };
        let mut stream = tokio::io::duplex(64).0;
        let err = fixture
            .manager
            .port_forward(&pod, 8080, &mut stream)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot find pod infra container"));
    }

    #[tokio::test]
    async fn container_logs_pass_tail_and_since() {
        let fixture = Fixture::new().await;
        let pod = make_pod("web", "uid-1", vec![make_container("app")]);
        let id = fixture.docker.add_running_container(&pod, "app");
        fixture.docker.set_log_output(b"line\n".to_vec());

        let output = fixture
            .manager
            .get_container_logs(
                &id,
                &ContainerLogOptions {
                    tail_lines: Some(100),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(output, b"line\n");
        let opts = fixture.docker.last_logs_options().unwrap();
        assert_eq!(opts.tail.as_deref(), Some("100"));
        assert!(opts.stdout && opts.stderr);
    }
}
