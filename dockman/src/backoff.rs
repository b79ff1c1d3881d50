//! Keyed exponential backoff used for image pulls and crash-loop gating.
//!
//! Callers pass timestamps explicitly, which keeps the arithmetic
//! deterministic and testable. An entry that has not been touched for twice
//! the maximum delay is considered expired and resets to the base delay.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct BackoffEntry {
    backoff: Duration,
    last_update: DateTime<Utc>,
}

pub struct Backoff {
    base: Duration,
    max: Duration,
    entries: Mutex<HashMap<String, BackoffEntry>>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Backoff {
            base,
            max,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Current delay for the key; zero when the key is unknown.
    pub fn get(&self, id: &str) -> Duration {
        let entries = self.entries.lock().unwrap();
        entries.get(id).map(|e| e.backoff).unwrap_or(Duration::ZERO)
    }

    /// Records another failure event, doubling the delay up to the maximum.
    pub fn next(&self, id: &str, event_time: DateTime<Utc>) {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get(id).copied();
        let new = match entry {
            Some(existing) if !has_expired(event_time, existing.last_update, self.max) => {
                BackoffEntry {
                    backoff: (existing.backoff * 2).min(self.max),
                    last_update: event_time,
                }
            }
            _ => BackoffEntry {
                backoff: self.base,
                last_update: event_time,
            },
        };
        entries.insert(id.to_string(), new);
    }

    /// True when `event_time` falls inside the key's current delay window,
    /// measured against `now`.
    pub fn is_in_backoff_since(&self, id: &str, event_time: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let entries = self.entries.lock().unwrap();
        match entries.get(id) {
            Some(entry) if !has_expired(now, entry.last_update, self.max) => {
                now.signed_duration_since(event_time)
                    < ChronoDuration::from_std(entry.backoff).unwrap_or(ChronoDuration::zero())
            }
            _ => false,
        }
    }

    /// True when the delay window measured from the last update has not yet
    /// elapsed.
    pub fn is_in_backoff_since_update(&self, id: &str, now: DateTime<Utc>) -> bool {
        let entries = self.entries.lock().unwrap();
        match entries.get(id) {
            Some(entry) => {
                now.signed_duration_since(entry.last_update)
                    < ChronoDuration::from_std(entry.backoff).unwrap_or(ChronoDuration::zero())
            }
            None => false,
        }
    }

    /// Drops entries idle for longer than twice the maximum delay.
    pub fn gc(&self, now: DateTime<Utc>) {
        let mut entries = self.entries.lock().unwrap();
        let max = self.max;
        entries.retain(|_, entry| !has_expired(now, entry.last_update, max));
    }

    pub fn delete(&self, id: &str) {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(id);
    }
}

fn has_expired(event_time: DateTime<Utc>, last_update: DateTime<Utc>, max: Duration) -> bool {
    let window = ChronoDuration::from_std(max * 2).unwrap_or(ChronoDuration::zero());
    event_time.signed_duration_since(last_update) > window
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn delay_doubles_until_max() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(8));
        backoff.next("key", at(0));
        assert_eq!(backoff.get("key"), Duration::from_secs(1));
        backoff.next("key", at(1));
        assert_eq!(backoff.get("key"), Duration::from_secs(2));
        backoff.next("key", at(2));
        backoff.next("key", at(3));
        assert_eq!(backoff.get("key"), Duration::from_secs(8));
        backoff.next("key", at(4));
        assert_eq!(backoff.get("key"), Duration::from_secs(8));
    }

    #[test]
    fn idle_entry_resets_to_base() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(4));
        backoff.next("key", at(0));
        backoff.next("key", at(1));
        assert_eq!(backoff.get("key"), Duration::from_secs(2));
        // More than 2 * max since last update.
        backoff.next("key", at(20));
        assert_eq!(backoff.get("key"), Duration::from_secs(1));
    }

    #[test]
    fn backoff_window_since_event() {
        let backoff = Backoff::new(Duration::from_secs(4), Duration::from_secs(60));
        backoff.next("key", at(0));
        assert!(backoff.is_in_backoff_since("key", at(0), at(2)));
        assert!(!backoff.is_in_backoff_since("key", at(0), at(5)));
        assert!(!backoff.is_in_backoff_since("other", at(0), at(1)));
    }

    #[test]
    fn backoff_window_since_update() {
        let backoff = Backoff::new(Duration::from_secs(10), Duration::from_secs(60));
        backoff.next("key", at(0));
        assert!(backoff.is_in_backoff_since_update("key", at(5)));
        assert!(!backoff.is_in_backoff_since_update("key", at(11)));
    }

    #[test]
    fn gc_drops_stale_entries() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(2));
        backoff.next("stale", at(0));
        backoff.next("fresh", at(9));
        backoff.gc(at(10));
        assert_eq!(backoff.get("stale"), Duration::ZERO);
        assert_eq!(backoff.get("fresh"), Duration::from_secs(1));
    }
}
