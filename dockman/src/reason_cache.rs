//! Bounded memory of the last creation/start failure per `(pod, container)`.
//!
//! Purely advisory: nothing in the sync path branches on this cache, it only
//! feeds the user-visible waiting reason in status conversion. Entries are
//! evicted silently under LRU pressure, so callers must tolerate absence.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasonInfo {
    pub reason: String,
    pub message: String,
}

pub struct ReasonCache {
    cache: RwLock<LruCache<String, ReasonInfo>>,
}

impl ReasonCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        ReasonCache {
            cache: RwLock::new(LruCache::new(capacity)),
        }
    }

    fn compose_key(uid: &str, container_name: &str) -> String {
        format!("{uid}_{container_name}")
    }

    pub fn put(
        &self,
        uid: &str,
        container_name: &str,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        let mut cache = self.cache.write().unwrap();
        cache.put(
            Self::compose_key(uid, container_name),
            ReasonInfo {
                reason: reason.into(),
                message: message.into(),
            },
        );
    }

    /// Lock-shared read; recency is not bumped, which only makes eviction
    /// order approximate.
    pub fn get(&self, uid: &str, container_name: &str) -> Option<ReasonInfo> {
        let cache = self.cache.read().unwrap();
        cache.peek(&Self::compose_key(uid, container_name)).cloned()
    }

    pub fn remove(&self, uid: &str, container_name: &str) {
        let mut cache = self.cache.write().unwrap();
        cache.pop(&Self::compose_key(uid, container_name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_remove() {
        let cache = ReasonCache::new(4);
        cache.put("uid-1", "app", "ErrImagePull", "registry unreachable");
        let info = cache.get("uid-1", "app").unwrap();
        assert_eq!(info.reason, "ErrImagePull");
        assert_eq!(info.message, "registry unreachable");

        cache.remove("uid-1", "app");
        assert!(cache.get("uid-1", "app").is_none());
    }

    #[test]
    fn entries_are_keyed_per_container() {
        let cache = ReasonCache::new(4);
        cache.put("uid-1", "app", "a", "m1");
        cache.put("uid-1", "sidecar", "b", "m2");
        assert_eq!(cache.get("uid-1", "app").unwrap().reason, "a");
        assert_eq!(cache.get("uid-1", "sidecar").unwrap().reason, "b");
        assert!(cache.get("uid-2", "app").is_none());
    }

    #[test]
    fn eviction_is_silent() {
        let cache = ReasonCache::new(2);
        cache.put("u", "a", "r1", "m");
        cache.put("u", "b", "r2", "m");
        cache.put("u", "c", "r3", "m");
        // Oldest entry dropped, latest two retained.
        assert!(cache.get("u", "a").is_none());
        assert!(cache.get("u", "b").is_some());
        assert!(cache.get("u", "c").is_some());
    }

    #[test]
    fn concurrent_readers_and_writer() {
        use std::sync::Arc;
        let cache = Arc::new(ReasonCache::new(64));
        let writer = {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    cache.put("uid", &format!("c{}", i % 8), "r", "m");
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let _ = cache.get("uid", &format!("c{}", i % 8));
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
