//! Filesystem mutex for the task aggregate
//!
//! Several editor agents may run their own server instance against the
//! same project, so cross-process writes are serialized with sentinel
//! files in the task directory: one `.write.lock` holder, any number of
//! `.read-*.lock` holders, writers admitted only when no readers are
//! present. Sentinels carry an absolute deadline; a sentinel older than
//! its timeout is stale and may be broken by any contender, with the
//! eviction reported back for the audit log.
//!
//! Deadlock rule: one write lock per task per process, unless the caller
//! names the already-held lock id in `current_held_locks`. When multiple
//! tasks must ever be locked together, acquire in ascending task-id order.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{WaveError, WaveResult};

/// Retry interval between acquisition attempts.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(100);
/// Default acquisition timeout, also the staleness horizon for sentinels.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const WRITE_LOCK: &str = ".write.lock";
const READ_PREFIX: &str = ".read-";

/// JSON body of a lock sentinel file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSentinel {
    pub process_id: u32,
    pub timestamp: DateTime<Utc>,
    pub task_id: String,
    pub timeout_ms: u64,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A stale sentinel this process broke while acquiring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Eviction {
    pub sentinel: LockSentinel,
    pub evicted_at: DateTime<Utc>,
}

/// Per-process lock manager.
pub struct LockManager {
    timeout: Duration,
    retry: Duration,
    /// task id → lock id of the write lock this process already holds.
    held_writes: DashMap<String, String>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl LockManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            retry: RETRY_INTERVAL,
            held_writes: DashMap::new(),
        }
    }

    /// Acquire the write lock for a task directory.
    pub async fn acquire_write(
        &self,
        task_dir: &Path,
        task_id: &str,
        cancel: Option<&CancellationToken>,
        current_held_locks: &[String],
    ) -> WaveResult<LockGuard> {
        if let Some(held) = self.held_writes.get(task_id) {
            if !current_held_locks.contains(held.value()) {
                return Err(WaveError::LockTimeout(format!(
                    "task {} write lock already held by this process",
                    task_id
                )));
            }
        }

        let lock_id = Uuid::new_v4().simple().to_string();
        let path = task_dir.join(WRITE_LOCK);
        let deadline = Utc::now() + chrono::Duration::from_std(self.timeout).unwrap_or_default();
        let mut evictions = Vec::new();

        loop {
            if !self.has_readers(task_dir) {
                match try_create_sentinel(&path, task_id, self.timeout, "write").await {
                    Ok(true) => {
                        self.held_writes.insert(task_id.to_string(), lock_id.clone());
                        debug!(task_id, %lock_id, "write lock acquired");
                        return Ok(LockGuard {
                            id: lock_id,
                            path,
                            task_id: task_id.to_string(),
                            kind: LockKind::Write,
                            evictions,
                            released: false,
                        });
                    }
                    Ok(false) => {
                        if let Some(eviction) = self.evict_if_stale(&path).await {
                            evictions.push(eviction);
                            continue;
                        }
                    }
                    Err(e) => return Err(e),
                }
            } else {
                self.evict_stale_readers(task_dir, &mut evictions).await;
            }

            if Utc::now() >= deadline {
                return Err(WaveError::LockTimeout(format!(
                    "timed out waiting for write lock on task {}",
                    task_id
                )));
            }
            if let Some(cancel) = cancel {
                tokio::select! {
                    _ = tokio::time::sleep(self.retry) => {}
                    _ = cancel.cancelled() => {
                        return Err(WaveError::LockTimeout(format!(
                            "acquisition cancelled for task {}",
                            task_id
                        )));
                    }
                }
            } else {
                tokio::time::sleep(self.retry).await;
            }
        }
    }

    /// Acquire a read lock. Multiple readers may hold one concurrently; no
    /// writer is admitted while any reader is present.
    pub async fn acquire_read(
        &self,
        task_dir: &Path,
        task_id: &str,
        cancel: Option<&CancellationToken>,
    ) -> WaveResult<LockGuard> {
        let lock_id = Uuid::new_v4().simple().to_string();
        let path = task_dir.join(format!("{}{}.lock", READ_PREFIX, lock_id));
        let write_path = task_dir.join(WRITE_LOCK);
        let deadline = Utc::now() + chrono::Duration::from_std(self.timeout).unwrap_or_default();
        let mut evictions = Vec::new();

        loop {
            if !write_path.exists() {
                if try_create_sentinel(&path, task_id, self.timeout, "read").await? {
                    return Ok(LockGuard {
                        id: lock_id,
                        path,
                        task_id: task_id.to_string(),
                        kind: LockKind::Read,
                        evictions,
                        released: false,
                    });
                }
            } else if let Some(eviction) = self.evict_if_stale(&write_path).await {
                evictions.push(eviction);
                continue;
            }

            if Utc::now() >= deadline {
                return Err(WaveError::LockTimeout(format!(
                    "timed out waiting for read lock on task {}",
                    task_id
                )));
            }
            if let Some(cancel) = cancel {
                tokio::select! {
                    _ = tokio::time::sleep(self.retry) => {}
                    _ = cancel.cancelled() => {
                        return Err(WaveError::LockTimeout(format!(
                            "acquisition cancelled for task {}",
                            task_id
                        )));
                    }
                }
            } else {
                tokio::time::sleep(self.retry).await;
            }
        }
    }

    /// Release a guard, removing its sentinel.
    pub async fn release(&self, mut guard: LockGuard) {
        guard.released = true;
        if guard.kind == LockKind::Write {
            self.held_writes.remove(&guard.task_id);
        }
        if let Err(e) = tokio::fs::remove_file(&guard.path).await {
            warn!("failed to remove lock sentinel {:?}: {}", guard.path, e);
        }
    }

    fn has_readers(&self, task_dir: &Path) -> bool {
        let Ok(entries) = std::fs::read_dir(task_dir) else {
            return false;
        };
        entries.filter_map(|e| e.ok()).any(|e| {
            e.file_name()
                .to_string_lossy()
                .starts_with(READ_PREFIX)
        })
    }

    async fn evict_stale_readers(&self, task_dir: &Path, evictions: &mut Vec<Eviction>) {
        let Ok(entries) = std::fs::read_dir(task_dir) else {
            return;
        };
        let reader_paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().starts_with(READ_PREFIX))
                    .unwrap_or(false)
            })
            .collect();
        for path in reader_paths {
            if let Some(eviction) = self.evict_if_stale(&path).await {
                evictions.push(eviction);
            }
        }
    }

    /// Break a sentinel whose timestamp is older than its own timeout.
    async fn evict_if_stale(&self, path: &Path) -> Option<Eviction> {
        let body = tokio::fs::read_to_string(path).await.ok()?;
        let sentinel: LockSentinel = serde_json::from_str(&body).ok()?;
        let age = Utc::now().signed_duration_since(sentinel.timestamp);
        if age.num_milliseconds() <= sentinel.timeout_ms as i64 {
            return None;
        }
        warn!(
            "evicting stale {} lock from pid {} (age {}ms)",
            sentinel.kind,
            sentinel.process_id,
            age.num_milliseconds()
        );
        tokio::fs::remove_file(path).await.ok()?;
        Some(Eviction {
            sentinel,
            evicted_at: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Read,
    Write,
}

/// A held lock. Prefer `LockManager::release`; dropping unreleased removes
/// the sentinel best-effort.
#[derive(Debug)]
pub struct LockGuard {
    pub id: String,
    path: PathBuf,
    task_id: String,
    kind: LockKind,
    /// Stale locks broken during acquisition, for the audit log.
    pub evictions: Vec<Eviction>,
    released: bool,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

async fn try_create_sentinel(
    path: &Path,
    task_id: &str,
    timeout: Duration,
    kind: &str,
) -> WaveResult<bool> {
    let sentinel = LockSentinel {
        process_id: std::process::id(),
        timestamp: Utc::now(),
        task_id: task_id.to_string(),
        timeout_ms: timeout.as_millis() as u64,
        kind: kind.to_string(),
    };
    let body = serde_json::to_string(&sentinel)?;
    match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(_file) => {
            tokio::fs::write(path, body).await?;
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => Err(
            WaveError::MissingPermissions(path.display().to_string()),
        ),
        Err(e) => Err(WaveError::Storage(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(timeout_ms: u64) -> LockManager {
        LockManager::new(Duration::from_millis(timeout_ms))
    }

    #[tokio::test]
    async fn test_write_lock_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let locks = manager(500);
        let guard = locks
            .acquire_write(tmp.path(), "task-1", None, &[])
            .await
            .unwrap();
        assert!(tmp.path().join(".write.lock").exists());
        locks.release(guard).await;
        assert!(!tmp.path().join(".write.lock").exists());
    }

    #[tokio::test]
    async fn test_second_write_in_process_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let locks = manager(500);
        let guard = locks
            .acquire_write(tmp.path(), "task-1", None, &[])
            .await
            .unwrap();
        let err = locks
            .acquire_write(tmp.path(), "task-1", None, &[])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "LOCK_TIMEOUT");
        locks.release(guard).await;
    }

    #[tokio::test]
    async fn test_reentry_allowed_with_held_lock_id() {
        let tmp = tempfile::tempdir().unwrap();
        let locks = manager(300);
        let guard = locks
            .acquire_write(tmp.path(), "task-1", None, &[])
            .await
            .unwrap();
        // Naming the held lock bypasses the deadlock rule; the sentinel
        // still blocks, so this times out rather than being rejected.
        let err = locks
            .acquire_write(tmp.path(), "task-1", None, &[guard.id.clone()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
        locks.release(guard).await;
    }

    #[tokio::test]
    async fn test_readers_block_writer() {
        let tmp = tempfile::tempdir().unwrap();
        let locks = manager(300);
        let reader = locks
            .acquire_read(tmp.path(), "task-1", None)
            .await
            .unwrap();
        let err = locks
            .acquire_write(tmp.path(), "task-1", None, &[])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "LOCK_TIMEOUT");
        locks.release(reader).await;
    }

    #[tokio::test]
    async fn test_multiple_readers_coexist() {
        let tmp = tempfile::tempdir().unwrap();
        let locks = manager(500);
        let first = locks.acquire_read(tmp.path(), "task-1", None).await.unwrap();
        let second = locks.acquire_read(tmp.path(), "task-1", None).await.unwrap();
        locks.release(first).await;
        locks.release(second).await;
    }

    #[tokio::test]
    async fn test_stale_write_lock_is_evicted() {
        let tmp = tempfile::tempdir().unwrap();
        let stale = LockSentinel {
            process_id: 99999,
            timestamp: Utc::now() - chrono::Duration::seconds(60),
            task_id: "task-1".into(),
            timeout_ms: 1000,
            kind: "write".into(),
        };
        std::fs::write(
            tmp.path().join(".write.lock"),
            serde_json::to_string(&stale).unwrap(),
        )
        .unwrap();

        let locks = manager(2000);
        let guard = locks
            .acquire_write(tmp.path(), "task-1", None, &[])
            .await
            .unwrap();
        assert_eq!(guard.evictions.len(), 1);
        assert_eq!(guard.evictions[0].sentinel.process_id, 99999);
        locks.release(guard).await;
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_wait() {
        let tmp = tempfile::tempdir().unwrap();
        let locks = manager(10_000);
        let guard = locks
            .acquire_write(tmp.path(), "task-1", None, &[])
            .await
            .unwrap();

        let other = manager(10_000);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = other
            .acquire_write(tmp.path(), "task-1", Some(&cancel), &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
        locks.release(guard).await;
    }
}
