//! Request-scoped sync result cache
//!
//! Memoizes full sync results by caller-supplied request id so a retried
//! tool call does not re-run the pipeline. Entries expire after a TTL and
//! are validated against hashes of the panel text and serialized task, so
//! a stale world never serves a cached result. This is a memoization layer
//! only, never a persistence substitute.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::models::SyncOutcome;
use crate::panel::fingerprint::content_hash;

/// Default entry TTL: 5 minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct CacheEntry {
    outcome: SyncOutcome,
    inserted_at: Instant,
    panel_hash: String,
    task_hash: String,
}

/// Per-process cache keyed by request id.
pub struct SyncCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl Default for SyncCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl SyncCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Fetch a cached outcome. Stale entries (expired, or recorded against
    /// different panel/task bytes) are removed on read.
    pub fn get(&self, request_id: &str, panel_text: &str, task_json: &str) -> Option<SyncOutcome> {
        let hit = {
            let entry = self.entries.get(request_id)?;
            let fresh = entry.inserted_at.elapsed() <= self.ttl
                && entry.panel_hash == content_hash(panel_text)
                && entry.task_hash == content_hash(task_json);
            if fresh {
                Some(entry.outcome.clone())
            } else {
                None
            }
        };
        if hit.is_none() {
            self.entries.remove(request_id);
        }
        hit
    }

    pub fn put(&self, request_id: &str, panel_text: &str, task_json: &str, outcome: SyncOutcome) {
        self.entries.insert(
            request_id.to_string(),
            CacheEntry {
                outcome,
                inserted_at: Instant::now(),
                panel_hash: content_hash(panel_text),
                task_hash: content_hash(task_json),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome() -> SyncOutcome {
        SyncOutcome {
            md_version: "abc".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_hit_within_ttl() {
        let cache = SyncCache::default();
        cache.put("req-1", "panel", "task", outcome());
        let hit = cache.get("req-1", "panel", "task").unwrap();
        assert_eq!(hit.md_version, "abc");
    }

    #[test]
    fn test_miss_on_unknown_request() {
        let cache = SyncCache::default();
        assert!(cache.get("req-x", "panel", "task").is_none());
    }

    #[test]
    fn test_changed_inputs_invalidate() {
        let cache = SyncCache::default();
        cache.put("req-1", "panel", "task", outcome());
        assert!(cache.get("req-1", "panel EDITED", "task").is_none());
        // The stale entry was removed on read.
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expired_entry_removed_on_read() {
        let cache = SyncCache::new(Duration::from_millis(0));
        cache.put("req-1", "panel", "task", outcome());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("req-1", "panel", "task").is_none());
        assert!(cache.is_empty());
    }
}
