//! In-memory fakes of every consumed interface, plus a fixture wiring them
//! into a manager. Only compiled for tests.

use crate::client::{
    ApiContainer, ApiImage, AttachOptions, ContainerDetails, CreateContainerOptions,
    CreateExecOptions, DockerClient, DockerError, DockerInfo, DockerResult, DockerVersionInfo,
    ExecInspect, HostConfig, ImageConfig, ImageDetails, LogsOptions, PullSecret, StartExecOptions,
};
use crate::config::DockerManagerConfig;
use crate::events::{EventRecorder, EventType, ObjectReference};
use crate::hooks::HookRunner;
use crate::labels::{CONTAINER_NAME_LABEL, new_labels};
use crate::manager::plan::expected_infra_container;
use crate::manager::{DockerManager, DockerManagerDeps};
use crate::names::{DockerName, build_docker_name, build_pod_full_name};
use crate::network::{DEFAULT_PLUGIN_NAME, NetworkPlugin, PodNetworkStatus};
use crate::oom::{OomAdjuster, ProcFs};
use crate::options::{RunContainerOptions, RuntimeHelper, make_port_mappings};
use crate::probe::LivenessManager;
use crate::runtime::{RunningPod, running_pod_from_status};
use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use common::{ContainerSpec, ExecAction, Handler, Lifecycle, ObjectMeta, Pod, PodSpec};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn make_pod(name: &str, uid: &str, containers: Vec<ContainerSpec>) -> Pod {
    Pod {
        api_version: "v1".to_string(),
        kind: "Pod".to_string(),
        metadata: ObjectMeta {
            name: name.to_string(),
            namespace: "default".to_string(),
            uid: uid.to_string(),
            ..Default::default()
        },
        spec: PodSpec {
            containers,
            ..Default::default()
        },
        status: Default::default(),
    }
}

pub fn make_container(name: &str) -> ContainerSpec {
    ContainerSpec {
        name: name.to_string(),
        image: format!("example.com/{name}:1"),
        ..Default::default()
    }
}

pub fn make_exec_pre_stop() -> Lifecycle {
    Lifecycle {
        pre_start: None,
        pre_stop: Some(Handler {
            exec: Some(ExecAction {
                command: vec!["/bin/drain".to_string()],
            }),
            http_get: None,
        }),
    }
}

#[derive(Default)]
struct FakeDockerState {
    /// Newest first, like the daemon's listing.
    containers: Vec<ContainerDetails>,
    /// image -> USER directive.
    images: HashMap<String, String>,
    pulled: Vec<String>,
    fail_pulls: usize,
    fail_ops: HashSet<String>,
    stop_graces: HashMap<String, u32>,
    api_version: String,
    counter: u64,
    exec_output: Vec<u8>,
    exec_states: Vec<ExecInspect>,
    exec_inspects: usize,
    log_output: Vec<u8>,
    last_logs_options: Option<LogsOptions>,
}

pub struct FakeDocker {
    state: Mutex<FakeDockerState>,
    timeline: Arc<Mutex<Vec<String>>>,
    resolv_dir: tempfile::TempDir,
    infra_image: String,
}

impl FakeDocker {
    pub fn new() -> Self {
        FakeDocker {
            state: Mutex::new(FakeDockerState {
                api_version: "1.22".to_string(),
                ..Default::default()
            }),
            timeline: Arc::new(Mutex::new(Vec::new())),
            resolv_dir: tempfile::TempDir::new().expect("temp dir"),
            infra_image: DockerManagerConfig::default().pod_infra_container_image,
        }
    }

    pub fn timeline_handle(&self) -> Arc<Mutex<Vec<String>>> {
        self.timeline.clone()
    }

    fn record(&self, entry: String) {
        self.timeline.lock().unwrap().push(entry);
    }

    fn container_display_name(details: &ContainerDetails) -> String {
        details
            .config
            .labels
            .get(CONTAINER_NAME_LABEL)
            .cloned()
            .unwrap_or_else(|| details.name.trim_start_matches('/').to_string())
    }

    pub fn add_image(&self, image: &str) {
        self.state
            .lock()
            .unwrap()
            .images
            .insert(image.to_string(), String::new());
    }

    pub fn add_image_with_user(&self, image: &str, user: &str) {
        self.state
            .lock()
            .unwrap()
            .images
            .insert(image.to_string(), user.to_string());
    }

    pub fn fail_next_pulls(&self, count: usize) {
        self.state.lock().unwrap().fail_pulls = count;
    }

    pub fn pulled_images(&self) -> Vec<String> {
        self.state.lock().unwrap().pulled.clone()
    }

    pub fn fail_on(&self, op: &str) {
        self.state.lock().unwrap().fail_ops.insert(op.to_string());
    }

    pub fn set_api_version(&self, version: &str) {
        self.state.lock().unwrap().api_version = version.to_string();
    }

    pub fn set_exec_output(&self, output: Vec<u8>) {
        self.state.lock().unwrap().exec_output = output;
    }

    pub fn queue_exec_states(&self, states: Vec<ExecInspect>) {
        self.state.lock().unwrap().exec_states = states;
    }

    pub fn exec_inspect_count(&self) -> usize {
        self.state.lock().unwrap().exec_inspects
    }

    pub fn set_log_output(&self, output: Vec<u8>) {
        self.state.lock().unwrap().log_output = output;
    }

    pub fn last_logs_options(&self) -> Option<LogsOptions> {
        self.state.lock().unwrap().last_logs_options.clone()
    }

    pub fn container(&self, id: &str) -> Option<ContainerDetails> {
        self.state
            .lock()
            .unwrap()
            .containers
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    pub fn mutate_container(&self, id: &str, mutate: impl FnOnce(&mut ContainerDetails)) {
        let mut state = self.state.lock().unwrap();
        let details = state
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .expect("container exists");
        mutate(details);
    }

    pub fn all_stopped(&self) -> bool {
        !self
            .state
            .lock()
            .unwrap()
            .containers
            .iter()
            .any(|c| c.state.running)
    }

    pub fn last_stop_grace(&self, id: &str) -> Option<u32> {
        self.state.lock().unwrap().stop_graces.get(id).copied()
    }

    pub fn running_container_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .containers
            .iter()
            .filter(|c| c.state.running)
            .map(|c| Self::container_display_name(c))
            .collect()
    }

    pub fn running_container_id_by_name(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .containers
            .iter()
            .find(|c| c.state.running && Self::container_display_name(c) == name)
            .map(|c| c.id.clone())
    }

    fn new_resolv_file(&self, id: &str) -> String {
        let path = self.resolv_dir.path().join(format!("resolv-{id}.conf"));
        std::fs::write(&path, "nameserver 10.0.0.10\n").expect("write resolv file");
        path.to_string_lossy().to_string()
    }

    fn insert_record(
        &self,
        pod: &Pod,
        container: &ContainerSpec,
        attempt: u32,
        running: bool,
        exit_code: i32,
        finished: bool,
    ) -> String {
        let identity = DockerName {
            pod_full_name: build_pod_full_name(&pod.metadata.name, &pod.metadata.namespace),
            pod_uid: pod.metadata.uid.clone(),
            container_name: container.name.clone(),
            attempt,
        };
        let (_, full_name) = build_docker_name(&identity, container);

        let mut state = self.state.lock().unwrap();
        state.counter += 1;
        let id = format!("fake{:06}", state.counter);
        let now = Utc::now();
        let mut details = ContainerDetails {
            id: id.clone(),
            name: format!("/{full_name}"),
            created: Some(now - ChronoDuration::seconds(30)),
            config: crate::client::ContainerConfig {
                image: container.image.clone(),
                labels: new_labels(container, pod, attempt as i32),
                ..Default::default()
            },
            state: crate::client::ContainerStateDetails {
                running,
                pid: if running { 1000 + state.counter as i32 } else { 0 },
                exit_code,
                oom_killed: false,
                error: String::new(),
                started_at: Some(now - ChronoDuration::seconds(20)),
                finished_at: if finished { Some(now) } else { None },
            },
            host_config: Some(HostConfig::default()),
            network_settings: None,
            image: format!("image-{}", container.image),
            volumes: HashMap::new(),
            resolv_conf_path: String::new(),
        };
        if running {
            details.state.finished_at = None;
            details.state.exit_code = 0;
        }
        details.resolv_conf_path = self.new_resolv_file(&id);
        state.containers.insert(0, details);
        id
    }

    pub fn add_running_infra(&self, pod: &Pod, ip: &str) -> String {
        let infra = expected_infra_container(pod, &self.infra_image);
        let id = self.insert_record(pod, &infra, 0, true, 0, false);
        self.mutate_container(&id, |details| {
            details.network_settings = Some(crate::client::NetworkSettings {
                ip_address: ip.to_string(),
            });
        });
        id
    }

    pub fn add_running_container(&self, pod: &Pod, name: &str) -> String {
        let container = pod.container_by_name(name).expect("container in spec").clone();
        self.insert_record(pod, &container, 0, true, 0, false)
    }

    pub fn add_exited_container(
        &self,
        pod: &Pod,
        name: &str,
        exit_code: i32,
        finished: bool,
    ) -> String {
        let container = pod.container_by_name(name).expect("container in spec").clone();
        self.insert_record(pod, &container, 0, false, exit_code, finished)
    }

    /// A running container whose daemon name carries no spec fingerprint.
    pub fn add_legacy_container(&self, pod: &Pod, name: &str) -> String {
        let container = pod.container_by_name(name).expect("container in spec").clone();
        let mut state = self.state.lock().unwrap();
        state.counter += 1;
        let id = format!("fake{:06}", state.counter);
        let now = Utc::now();
        let details = ContainerDetails {
            id: id.clone(),
            name: format!(
                "/k8s_{}_{}_{}_{}_0",
                container.name, pod.metadata.name, pod.metadata.namespace, pod.metadata.uid
            ),
            created: Some(now - ChronoDuration::seconds(30)),
            config: crate::client::ContainerConfig {
                image: container.image.clone(),
                labels: new_labels(&container, pod, 0),
                ..Default::default()
            },
            state: crate::client::ContainerStateDetails {
                running: true,
                pid: 1000 + state.counter as i32,
                started_at: Some(now - ChronoDuration::seconds(20)),
                ..Default::default()
            },
            host_config: Some(HostConfig::default()),
            ..Default::default()
        };
        state.containers.insert(0, details);
        id
    }

    pub fn add_foreign_container(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.counter += 1;
        let id = format!("fake{:06}", state.counter);
        let details = ContainerDetails {
            id,
            name: format!("/{name}"),
            state: crate::client::ContainerStateDetails {
                running: true,
                pid: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        state.containers.insert(0, details);
    }

    fn check_fail(&self, op: &str, target: &str) -> DockerResult<()> {
        let state = self.state.lock().unwrap();
        if state.fail_ops.contains(op) || state.fail_ops.contains(&format!("{op}:{target}")) {
            return Err(DockerError::Api(format!("injected {op} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl DockerClient for FakeDocker {
    async fn info(&self) -> DockerResult<DockerInfo> {
        Ok(DockerInfo::default())
    }

    async fn version(&self) -> DockerResult<DockerVersionInfo> {
        let state = self.state.lock().unwrap();
        Ok(DockerVersionInfo {
            version: "1.11.2".to_string(),
            api_version: state.api_version.clone(),
        })
    }

    async fn list_containers(&self, all: bool) -> DockerResult<Vec<ApiContainer>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .iter()
            .filter(|c| all || c.state.running)
            .map(|c| ApiContainer {
                id: c.id.clone(),
                names: vec![c.name.clone()],
                image: c.config.image.clone(),
                created: c.created,
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> DockerResult<ContainerDetails> {
        self.container(id).ok_or(DockerError::NoSuchContainer {
            id: id.to_string(),
        })
    }

    async fn create_container(&self, opts: CreateContainerOptions) -> DockerResult<String> {
        let display = opts
            .config
            .labels
            .get(CONTAINER_NAME_LABEL)
            .cloned()
            .unwrap_or_else(|| opts.name.clone());
        self.check_fail("create", &display)?;

        let id = {
            let mut state = self.state.lock().unwrap();
            state.counter += 1;
            format!("fake{:06}", state.counter)
        };
        let resolv_conf_path = self.new_resolv_file(&id);
        let details = ContainerDetails {
            id: id.clone(),
            name: format!("/{}", opts.name),
            created: Some(Utc::now()),
            config: opts.config,
            state: crate::client::ContainerStateDetails::default(),
            host_config: None,
            network_settings: None,
            image: String::new(),
            volumes: HashMap::new(),
            resolv_conf_path,
        };
        self.state.lock().unwrap().containers.insert(0, details);
        self.record(format!("create:{display}"));
        Ok(id)
    }

    async fn start_container(&self, id: &str, host_config: HostConfig) -> DockerResult<()> {
        let display = self
            .container(id)
            .map(|c| Self::container_display_name(&c))
            .unwrap_or_else(|| id.to_string());
        self.check_fail("start", &display)?;

        let mut state = self.state.lock().unwrap();
        let counter = state.counter;
        let details = state
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(DockerError::NoSuchContainer { id: id.to_string() })?;
        details.state.running = true;
        details.state.pid = 1000 + counter as i32;
        details.state.started_at = Some(Utc::now());
        if Self::container_display_name(details) == crate::names::POD_INFRA_CONTAINER_NAME {
            details.network_settings = Some(crate::client::NetworkSettings {
                ip_address: "10.100.0.7".to_string(),
            });
        }
        details.host_config = Some(host_config);
        drop(state);
        self.record(format!("start:{display}"));
        Ok(())
    }

    async fn stop_container(&self, id: &str, grace_period_seconds: u32) -> DockerResult<()> {
        let display = self
            .container(id)
            .map(|c| Self::container_display_name(&c))
            .unwrap_or_else(|| id.to_string());
        self.check_fail("stop", &display)?;

        let mut state = self.state.lock().unwrap();
        state
            .stop_graces
            .insert(id.to_string(), grace_period_seconds);
        let details = state
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(DockerError::NoSuchContainer { id: id.to_string() })?;
        if !details.state.running {
            return Err(DockerError::ContainerNotRunning { id: id.to_string() });
        }
        details.state.running = false;
        details.state.finished_at = Some(Utc::now());
        details.state.exit_code = 0;
        drop(state);
        self.record(format!("stop:{display}"));
        Ok(())
    }

    async fn logs(&self, opts: LogsOptions) -> DockerResult<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        state.last_logs_options = Some(opts);
        Ok(state.log_output.clone())
    }

    async fn create_exec(&self, _opts: CreateExecOptions) -> DockerResult<String> {
        Ok("exec-1".to_string())
    }

    async fn start_exec(&self, _exec_id: &str, _opts: StartExecOptions) -> DockerResult<Vec<u8>> {
        Ok(self.state.lock().unwrap().exec_output.clone())
    }

    async fn inspect_exec(&self, _exec_id: &str) -> DockerResult<ExecInspect> {
        let mut state = self.state.lock().unwrap();
        state.exec_inspects += 1;
        if state.exec_states.is_empty() {
            return Ok(ExecInspect {
                running: false,
                exit_code: 0,
            });
        }
        Ok(state.exec_states.remove(0))
    }

    async fn attach_to_container(&self, _opts: AttachOptions) -> DockerResult<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn inspect_image(&self, image: &str) -> DockerResult<ImageDetails> {
        let state = self.state.lock().unwrap();
        match state.images.get(image) {
            Some(user) => Ok(ImageDetails {
                id: format!("image-{image}"),
                config: Some(ImageConfig { user: user.clone() }),
            }),
            None => Err(DockerError::NoSuchImage {
                image: image.to_string(),
            }),
        }
    }

    async fn list_images(&self) -> DockerResult<Vec<ApiImage>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .images
            .keys()
            .map(|image| ApiImage {
                id: format!("image-{image}"),
                repo_tags: vec![image.clone()],
                size: 0,
            })
            .collect())
    }

    async fn remove_image(&self, image: &str) -> DockerResult<()> {
        self.state.lock().unwrap().images.remove(image);
        Ok(())
    }

    async fn pull_image(&self, image: &str, _secrets: &[PullSecret]) -> DockerResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_pulls > 0 {
            state.fail_pulls -= 1;
            return Err(DockerError::Api("injected pull failure".to_string()));
        }
        state.images.insert(image.to_string(), String::new());
        state.pulled.push(image.to_string());
        Ok(())
    }
}

pub struct FakeNetworkPlugin {
    name: String,
    ip: Option<IpAddr>,
    calls: Mutex<Vec<String>>,
    fail_setup: AtomicBool,
    fail_teardown: AtomicBool,
    timeline: Arc<Mutex<Vec<String>>>,
}

impl FakeNetworkPlugin {
    pub fn new(name: &str, ip: Option<IpAddr>, timeline: Arc<Mutex<Vec<String>>>) -> Self {
        FakeNetworkPlugin {
            name: name.to_string(),
            ip,
            calls: Mutex::new(Vec::new()),
            fail_setup: AtomicBool::new(false),
            fail_teardown: AtomicBool::new(false),
            timeline,
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_setup(&self, fail: bool) {
        self.fail_setup.store(fail, Ordering::SeqCst);
    }

    #[allow(dead_code)]
    pub fn fail_teardown(&self, fail: bool) {
        self.fail_teardown.store(fail, Ordering::SeqCst);
    }

    fn record(&self, entry: String) {
        self.calls.lock().unwrap().push(entry.clone());
        self.timeline.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl NetworkPlugin for FakeNetworkPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_up_pod(&self, namespace: &str, name: &str, id: &str) -> Result<()> {
        self.record(format!("setup:{name}.{namespace}:{id}"));
        if self.fail_setup.load(Ordering::SeqCst) {
            bail!("injected network setup failure");
        }
        Ok(())
    }

    async fn tear_down_pod(&self, namespace: &str, name: &str, id: &str) -> Result<()> {
        self.record(format!("teardown:{name}.{namespace}:{id}"));
        if self.fail_teardown.load(Ordering::SeqCst) {
            bail!("injected network teardown failure");
        }
        Ok(())
    }

    async fn status(
        &self,
        _namespace: &str,
        _name: &str,
        _id: &str,
    ) -> Result<Option<PodNetworkStatus>> {
        Ok(self.ip.map(|ip| PodNetworkStatus { ip }))
    }
}

#[derive(Default)]
pub struct FakeHookRunner {
    calls: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
    fail: AtomicBool,
}

impl FakeHookRunner {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl HookRunner for FakeHookRunner {
    async fn run(
        &self,
        container_id: &str,
        _pod: &Pod,
        _container: &ContainerSpec,
        _handler: &Handler,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(container_id.to_string());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            bail!("injected hook failure");
        }
        Ok(())
    }
}

pub struct FakeRuntimeHelper;

#[async_trait]
impl RuntimeHelper for FakeRuntimeHelper {
    async fn generate_run_container_options(
        &self,
        _pod: &Pod,
        container: &ContainerSpec,
    ) -> Result<RunContainerOptions> {
        Ok(RunContainerOptions {
            envs: container.env.clone(),
            port_mappings: make_port_mappings(container),
            ..Default::default()
        })
    }
}

#[derive(Default)]
pub struct FakeRecorder {
    events: Mutex<Vec<(String, EventType, String)>>,
}

impl FakeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_reason(&self, reason: &str) -> bool {
        self.events
            .lock()
            .unwrap()
            .iter()
            .any(|(r, _, _)| r == reason)
    }

    pub fn messages_for(&self, reason: &str) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _, _)| r == reason)
            .map(|(_, _, m)| m.clone())
            .collect()
    }
}

impl EventRecorder for FakeRecorder {
    fn event(
        &self,
        _reference: &ObjectReference,
        event_type: EventType,
        reason: &str,
        message: String,
    ) {
        self.events
            .lock()
            .unwrap()
            .push((reason.to_string(), event_type, message));
    }
}

#[derive(Default)]
pub struct FakeOom {
    applied: Mutex<Vec<i32>>,
}

impl FakeOom {
    pub fn applied(&self) -> Vec<i32> {
        self.applied.lock().unwrap().clone()
    }
}

impl OomAdjuster for FakeOom {
    fn apply_oom_score_adj_container(
        &self,
        _cgroup_name: &str,
        oom_score_adj: i32,
        _max_tries: i32,
    ) -> Result<()> {
        self.applied.lock().unwrap().push(oom_score_adj);
        Ok(())
    }
}

pub struct FakeProcFs;

impl ProcFs for FakeProcFs {
    fn get_full_container_name(&self, pid: i32) -> Result<String> {
        Ok(format!("/docker/{pid}"))
    }
}

pub struct FixtureBuilder {
    pub network_name: String,
    pub network_ip: Option<IpAddr>,
    pub config: DockerManagerConfig,
}

impl FixtureBuilder {
    pub fn new() -> Self {
        FixtureBuilder {
            network_name: DEFAULT_PLUGIN_NAME.to_string(),
            network_ip: None,
            config: DockerManagerConfig {
                pull_qps: 0.0,
                serialize_image_pulls: false,
                ..Default::default()
            },
        }
    }

    pub async fn build(mut self) -> Fixture {
        let logs_dir = tempfile::TempDir::new().expect("temp dir");
        self.config.container_logs_dir = logs_dir.path().to_path_buf();

        let docker = Arc::new(FakeDocker::new());
        let timeline = docker.timeline_handle();
        let recorder = Arc::new(FakeRecorder::new());
        let network = Arc::new(FakeNetworkPlugin::new(
            &self.network_name,
            self.network_ip,
            timeline.clone(),
        ));
        let hooks = Arc::new(FakeHookRunner::default());
        let liveness = Arc::new(LivenessManager::new());
        let oom = Arc::new(FakeOom::default());

        let manager = DockerManager::new(
            DockerManagerDeps {
                client: docker.clone(),
                recorder: recorder.clone(),
                network_plugin: network.clone(),
                liveness_manager: liveness.clone(),
                runtime_helper: Arc::new(FakeRuntimeHelper),
                hook_runner: hooks.clone(),
                oom_adjuster: oom.clone(),
                proc_fs: Arc::new(FakeProcFs),
            },
            self.config,
        )
        .await;

        Fixture {
            manager: Arc::new(manager),
            docker,
            recorder,
            network,
            hooks,
            liveness,
            oom,
            timeline,
            _logs_dir: logs_dir,
        }
    }
}

pub struct Fixture {
    pub manager: Arc<DockerManager>,
    pub docker: Arc<FakeDocker>,
    pub recorder: Arc<FakeRecorder>,
    pub network: Arc<FakeNetworkPlugin>,
    pub hooks: Arc<FakeHookRunner>,
    pub liveness: Arc<LivenessManager>,
    pub oom: Arc<FakeOom>,
    timeline: Arc<Mutex<Vec<String>>>,
    _logs_dir: tempfile::TempDir,
}

impl Fixture {
    pub async fn new() -> Self {
        FixtureBuilder::new().build().await
    }

    pub fn timeline(&self) -> Vec<String> {
        self.timeline.lock().unwrap().clone()
    }

    pub async fn running_pod(&self, uid: &str, name: &str) -> RunningPod {
        let status = self
            .manager
            .get_pod_status(uid, name, "default")
            .await
            .expect("pod status");
        running_pod_from_status(&status)
    }
}
