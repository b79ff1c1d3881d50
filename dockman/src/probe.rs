//! Liveness probe results, as consumed by the change planner.
//!
//! The prober itself lives outside this crate; it publishes its latest
//! verdict per container id into this map. A container with no entry is
//! treated the same as a healthy one.

use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    Success,
    Failure,
}

#[derive(Default)]
pub struct LivenessManager {
    results: DashMap<String, ProbeResult>,
}

impl LivenessManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, container_id: &str) -> Option<ProbeResult> {
        self.results.get(container_id).map(|r| *r.value())
    }

    pub fn set(&self, container_id: impl Into<String>, result: ProbeResult) {
        self.results.insert(container_id.into(), result);
    }

    pub fn remove(&self, container_id: &str) {
        self.results.remove(container_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_container_has_no_result() {
        let manager = LivenessManager::new();
        assert_eq!(manager.get("missing"), None);
    }

    #[test]
    fn latest_result_wins() {
        let manager = LivenessManager::new();
        manager.set("c1", ProbeResult::Success);
        manager.set("c1", ProbeResult::Failure);
        assert_eq!(manager.get("c1"), Some(ProbeResult::Failure));
        manager.remove("c1");
        assert_eq!(manager.get("c1"), None);
    }
}
