//! Image acquisition gate: pull policy, qps throttling, backoff, events.
//!
//! The launcher never talks to the registry in its hot path; it goes through
//! an [`ImagePuller`], which decides whether a pull is needed at all, applies
//! per-image backoff, and emits the user-visible pull events. An optional
//! serializing wrapper funnels all pulls through a single worker so only one
//! pull runs at a time.

use crate::backoff::Backoff;
use crate::client::{DockerClient, DockerError, PullSecret};
use crate::error::SyncError;
use crate::events::{
    self, EventRecorder, EventType, generate_container_ref,
};
use async_trait::async_trait;
use chrono::Utc;
use common::{ContainerSpec, Pod, PullPolicy};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct ImagePullFailure {
    pub error: SyncError,
    pub message: String,
}

impl ImagePullFailure {
    fn new(error: SyncError, message: impl Into<String>) -> Self {
        ImagePullFailure {
            error,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait ImagePuller: Send + Sync {
    async fn pull_image(
        &self,
        pod: &Pod,
        container: &ContainerSpec,
        secrets: &[PullSecret],
    ) -> Result<(), ImagePullFailure>;
}

fn should_pull_image(container: &ContainerSpec, image_present: bool) -> bool {
    match container.image_pull_policy {
        PullPolicy::Always => true,
        PullPolicy::Never => false,
        PullPolicy::IfNotPresent => !image_present,
    }
}

pub async fn is_image_present(
    client: &dyn DockerClient,
    image: &str,
) -> Result<bool, DockerError> {
    match client.inspect_image(image).await {
        Ok(_) => Ok(true),
        Err(DockerError::NoSuchImage { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Simple token bucket so registry traffic stays under the configured qps.
/// Tokens may go negative, which naturally serializes waiting pulls.
struct TokenBucket {
    qps: f32,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(qps: f32, burst: usize) -> Self {
        TokenBucket {
            qps,
            tokens: burst.max(1) as f64,
            last_refill: Instant::now(),
        }
    }

    fn reserve(&mut self, burst: usize) -> Duration {
        let now = Instant::now();
        let refill = self.last_refill.elapsed().as_secs_f64() * self.qps as f64;
        self.tokens = (self.tokens + refill).min(burst.max(1) as f64);
        self.last_refill = now;
        self.tokens -= 1.0;
        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.qps as f64)
        }
    }
}

pub struct ThrottledImagePuller {
    client: Arc<dyn DockerClient>,
    recorder: Arc<dyn EventRecorder>,
    backoff: Backoff,
    burst: usize,
    limiter: Option<Mutex<TokenBucket>>,
}

impl ThrottledImagePuller {
    pub fn new(
        client: Arc<dyn DockerClient>,
        recorder: Arc<dyn EventRecorder>,
        backoff_base: Duration,
        backoff_max: Duration,
        qps: f32,
        burst: usize,
    ) -> Self {
        let limiter = (qps > 0.0).then(|| Mutex::new(TokenBucket::new(qps, burst)));
        ThrottledImagePuller {
            client,
            recorder,
            backoff: Backoff::new(backoff_base, backoff_max),
            burst,
            limiter,
        }
    }

    async fn throttle(&self) {
        let wait = match &self.limiter {
            Some(limiter) => limiter.lock().unwrap().reserve(self.burst),
            None => Duration::ZERO,
        };
        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "throttling image pull");
            tokio::time::sleep(wait).await;
        }
    }
}

#[async_trait]
impl ImagePuller for ThrottledImagePuller {
    async fn pull_image(
        &self,
        pod: &Pod,
        container: &ContainerSpec,
        secrets: &[PullSecret],
    ) -> Result<(), ImagePullFailure> {
        let reference = generate_container_ref(pod, container);
        let image = container.image.as_str();

        let present = match is_image_present(self.client.as_ref(), image).await {
            Ok(present) => present,
            Err(e) => {
                let message = format!("failed to inspect image {image:?}: {e}");
                self.recorder.event(
                    &reference,
                    EventType::Warning,
                    events::FAILED_TO_INSPECT_IMAGE,
                    message.clone(),
                );
                return Err(ImagePullFailure::new(SyncError::ImageInspect, message));
            }
        };

        if !should_pull_image(container, present) {
            if present {
                self.recorder.event(
                    &reference,
                    EventType::Normal,
                    events::PULLED_IMAGE,
                    format!("Container image {image:?} already present on machine"),
                );
                return Ok(());
            }
            let message =
                format!("Container image {image:?} is not present with pull policy of Never");
            self.recorder.event(
                &reference,
                EventType::Warning,
                events::ERR_IMAGE_NEVER_PULL_POLICY,
                message.clone(),
            );
            return Err(ImagePullFailure::new(SyncError::ImageNeverPull, message));
        }

        let backoff_key = format!("{}_{}", pod.metadata.uid, image);
        if self
            .backoff
            .is_in_backoff_since_update(&backoff_key, Utc::now())
        {
            let message = format!("Back-off pulling image {image:?}");
            self.recorder.event(
                &reference,
                EventType::Normal,
                events::BACK_OFF_PULL_IMAGE,
                message.clone(),
            );
            return Err(ImagePullFailure::new(SyncError::ImagePullBackOff, message));
        }

        self.recorder.event(
            &reference,
            EventType::Normal,
            events::PULLING_IMAGE,
            format!("Pulling image {image:?}"),
        );
        self.throttle().await;
        if let Err(e) = self.client.pull_image(image, secrets).await {
            let message = format!("Failed to pull image {image:?}: {e}");
            self.recorder.event(
                &reference,
                EventType::Warning,
                events::FAILED_TO_PULL_IMAGE,
                message.clone(),
            );
            self.backoff.next(&backoff_key, Utc::now());
            return Err(ImagePullFailure::new(SyncError::ImagePull, message));
        }

        info!(image, pod_name = %pod.metadata.name, "pulled image");
        self.recorder.event(
            &reference,
            EventType::Normal,
            events::PULLED_IMAGE,
            format!("Successfully pulled image {image:?}"),
        );
        self.backoff.gc(Utc::now());
        Ok(())
    }
}

struct PullRequest {
    pod: Pod,
    container: ContainerSpec,
    secrets: Vec<PullSecret>,
    reply: tokio::sync::oneshot::Sender<Result<(), ImagePullFailure>>,
}

/// Funnels every pull through one background worker so at most one pull is
/// in flight at a time.
pub struct SerializedImagePuller {
    requests: tokio::sync::mpsc::UnboundedSender<PullRequest>,
}

impl SerializedImagePuller {
    pub fn new(inner: Arc<ThrottledImagePuller>) -> Self {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<PullRequest>();
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let result = inner
                    .pull_image(&request.pod, &request.container, &request.secrets)
                    .await;
                // The requester may have gone away; that is not our problem.
                let _ = request.reply.send(result);
            }
        });
        SerializedImagePuller { requests: tx }
    }
}

#[async_trait]
impl ImagePuller for SerializedImagePuller {
    async fn pull_image(
        &self,
        pod: &Pod,
        container: &ContainerSpec,
        secrets: &[PullSecret],
    ) -> Result<(), ImagePullFailure> {
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        let request = PullRequest {
            pod: pod.clone(),
            container: container.clone(),
            secrets: secrets.to_vec(),
            reply: reply_tx,
        };
        if self.requests.send(request).is_err() {
            return Err(ImagePullFailure::new(
                SyncError::ImagePull,
                "image pull worker is gone",
            ));
        }
        reply_rx.await.unwrap_or_else(|_| {
            Err(ImagePullFailure::new(
                SyncError::ImagePull,
                "image pull worker dropped the request",
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeDocker, FakeRecorder, make_pod};

    fn make_container(policy: PullPolicy) -> ContainerSpec {
        ContainerSpec {
            name: "app".to_string(),
            image: "example.com/app:1.0".to_string(),
            image_pull_policy: policy,
            ..Default::default()
        }
    }

    fn make_puller(
        docker: Arc<FakeDocker>,
        recorder: Arc<FakeRecorder>,
    ) -> ThrottledImagePuller {
        ThrottledImagePuller::new(
            docker,
            recorder,
            Duration::from_secs(10),
            Duration::from_secs(60),
            0.0,
            1,
        )
    }

    #[test]
    fn pull_policy_decisions() {
        assert!(should_pull_image(&make_container(PullPolicy::Always), true));
        assert!(!should_pull_image(
            &make_container(PullPolicy::IfNotPresent),
            true
        ));
        assert!(should_pull_image(
            &make_container(PullPolicy::IfNotPresent),
            false
        ));
        assert!(!should_pull_image(&make_container(PullPolicy::Never), false));
    }

    #[tokio::test]
    async fn present_image_is_not_pulled_again() {
        let docker = Arc::new(FakeDocker::new());
        docker.add_image("example.com/app:1.0");
        let recorder = Arc::new(FakeRecorder::new());
        let puller = make_puller(docker.clone(), recorder.clone());

        let pod = make_pod("web", "uid-1", vec![make_container(PullPolicy::IfNotPresent)]);
        puller
            .pull_image(&pod, &pod.spec.containers[0], &[])
            .await
            .unwrap();
        assert_eq!(docker.pulled_images(), Vec::<String>::new());
        assert!(recorder.has_reason(events::PULLED_IMAGE));
    }

    #[tokio::test]
    async fn never_policy_rejects_missing_image() {
        let docker = Arc::new(FakeDocker::new());
        let recorder = Arc::new(FakeRecorder::new());
        let puller = make_puller(docker, recorder.clone());

        let pod = make_pod("web", "uid-1", vec![make_container(PullPolicy::Never)]);
        let failure = puller
            .pull_image(&pod, &pod.spec.containers[0], &[])
            .await
            .unwrap_err();
        assert_eq!(failure.error, SyncError::ImageNeverPull);
        assert!(recorder.has_reason(events::ERR_IMAGE_NEVER_PULL_POLICY));
    }

    #[tokio::test]
    async fn failed_pull_enters_backoff() {
        let docker = Arc::new(FakeDocker::new());
        docker.fail_next_pulls(2);
        let recorder = Arc::new(FakeRecorder::new());
        let puller = make_puller(docker.clone(), recorder.clone());

        let pod = make_pod("web", "uid-1", vec![make_container(PullPolicy::IfNotPresent)]);
        let failure = puller
            .pull_image(&pod, &pod.spec.containers[0], &[])
            .await
            .unwrap_err();
        assert_eq!(failure.error, SyncError::ImagePull);

        // Second attempt inside the window short-circuits with backoff.
        let failure = puller
            .pull_image(&pod, &pod.spec.containers[0], &[])
            .await
            .unwrap_err();
        assert_eq!(failure.error, SyncError::ImagePullBackOff);
        assert!(recorder.has_reason(events::BACK_OFF_PULL_IMAGE));
        assert_eq!(docker.pulled_images().len(), 1);
    }

    #[tokio::test]
    async fn successful_pull_records_event() {
        let docker = Arc::new(FakeDocker::new());
        let recorder = Arc::new(FakeRecorder::new());
        let puller = make_puller(docker.clone(), recorder.clone());

        let pod = make_pod("web", "uid-1", vec![make_container(PullPolicy::Always)]);
        puller
            .pull_image(&pod, &pod.spec.containers[0], &[])
            .await
            .unwrap();
        assert_eq!(docker.pulled_images(), vec!["example.com/app:1.0".to_string()]);
        assert!(recorder.has_reason(events::PULLING_IMAGE));
        assert!(recorder.has_reason(events::PULLED_IMAGE));
    }

    #[tokio::test]
    async fn serialized_puller_forwards_results() {
        let docker = Arc::new(FakeDocker::new());
        let recorder = Arc::new(FakeRecorder::new());
        let inner = Arc::new(make_puller(docker.clone(), recorder));
        let puller = SerializedImagePuller::new(inner);

        let pod = make_pod("web", "uid-1", vec![make_container(PullPolicy::Always)]);
        puller
            .pull_image(&pod, &pod.spec.containers[0], &[])
            .await
            .unwrap();
        assert_eq!(docker.pulled_images().len(), 1);
    }
}
