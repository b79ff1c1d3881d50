//! Error taxonomy for reconciliation failures.
//!
//! Every failure the manager can hit while driving a pod maps to one of
//! these variants. None of them crash the sync loop: they are attached to a
//! [`crate::result::SyncResult`] and cached in the reason cache so that the
//! next status query can surface a meaningful waiting reason. The `Display`
//! text doubles as the short reason code shown to users, so it is stable.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    #[error("ErrImagePull")]
    ImagePull,
    #[error("ImagePullBackOff")]
    ImagePullBackOff,
    #[error("ImageInspectError")]
    ImageInspect,
    #[error("ErrImageNeverPull")]
    ImageNeverPull,
    #[error("RunContainerError")]
    RunContainer,
    #[error("KillContainerError")]
    KillContainer,
    #[error("SetupNetworkError")]
    SetupNetwork,
    #[error("TeardownNetworkError")]
    TeardownNetwork,
    #[error("VerifyNonRootError")]
    VerifyNonRoot,
    #[error("CrashLoopBackOff")]
    CrashLoopBackOff,
    #[error("NoContainersInPod")]
    NoContainersInPod,
    #[error("NoPodInfraContainerInPod")]
    NoPodInfraContainer,
    #[error("ContainerCannotRun")]
    ContainerCannotRun,
}

impl SyncError {
    /// The short reason code recorded in the reason cache and in events.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}
