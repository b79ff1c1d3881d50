//! Structured results of a pod sync.
//!
//! A sync produces one [`SyncResult`] per discrete action (start, kill,
//! network setup, network teardown). The aggregated [`PodSyncResult`] is
//! what callers inspect to decide whether to re-queue the pod; the manager
//! itself never retries.

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    StartContainer,
    KillContainer,
    SetupNetwork,
    TeardownNetwork,
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SyncAction::StartContainer => "StartContainer",
            SyncAction::KillContainer => "KillContainer",
            SyncAction::SetupNetwork => "SetupNetwork",
            SyncAction::TeardownNetwork => "TeardownNetwork",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncResult {
    pub action: SyncAction,
    /// Container name, or pod full name for network actions.
    pub target: String,
    pub error: Option<SyncError>,
    pub message: Option<String>,
}

impl SyncResult {
    pub fn new(action: SyncAction, target: impl Into<String>) -> Self {
        SyncResult {
            action,
            target: target.into(),
            error: None,
            message: None,
        }
    }

    pub fn fail(&mut self, error: SyncError, message: impl Into<String>) {
        self.error = Some(error);
        self.message = Some(message.into());
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Default)]
pub struct PodSyncResult {
    pub sync_results: Vec<SyncResult>,
    /// A failure that aborted the sync before any per-action result could
    /// describe it (e.g. the change computation itself failing).
    pub sync_error: Option<String>,
}

impl PodSyncResult {
    pub fn add_sync_result(&mut self, result: SyncResult) {
        self.sync_results.push(result);
    }

    pub fn add_pod_sync_result(&mut self, other: PodSyncResult) {
        self.sync_results.extend(other.sync_results);
        if self.sync_error.is_none() {
            self.sync_error = other.sync_error;
        }
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.sync_error = Some(message.into());
    }

    /// Aggregated failure text, or `None` when every action succeeded.
    pub fn error(&self) -> Option<String> {
        let mut messages: Vec<String> = Vec::new();
        if let Some(err) = &self.sync_error {
            messages.push(err.clone());
        }
        for result in &self.sync_results {
            if let Some(error) = &result.error {
                messages.push(format!(
                    "failed to {} {:?}: {} ({})",
                    result.action,
                    result.target,
                    error,
                    result.message.as_deref().unwrap_or("")
                ));
            }
        }
        if messages.is_empty() {
            None
        } else {
            Some(messages.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_result_has_no_error() {
        let result = PodSyncResult::default();
        assert!(result.error().is_none());
    }

    #[test]
    fn failed_action_surfaces_in_error() {
        let mut result = PodSyncResult::default();
        let mut start = SyncResult::new(SyncAction::StartContainer, "app");
        start.fail(SyncError::RunContainer, "daemon exploded");
        result.add_sync_result(start);
        result.add_sync_result(SyncResult::new(SyncAction::KillContainer, "old"));

        let text = result.error().unwrap();
        assert!(text.contains("RunContainerError"));
        assert!(text.contains("daemon exploded"));
    }

    #[test]
    fn merging_results_keeps_first_sync_error() {
        let mut first = PodSyncResult::default();
        first.fail("initial failure");
        let mut second = PodSyncResult::default();
        second.fail("later failure");
        first.add_pod_sync_result(second);
        assert_eq!(first.sync_error.as_deref(), Some("initial failure"));
    }
}
