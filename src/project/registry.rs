//! Global project registry
//!
//! `~/.wave/projects.json` maps project roots to slugs and repos so a
//! session can reconnect by any of the three. The file is guarded by an
//! advisory lock; concurrent server instances read and update it safely.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{WaveError, WaveResult};

/// One registered project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: Uuid,
    pub slug: String,
    pub root: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_connected_at: DateTime<Utc>,
}

/// Selector for `connect_project`: exactly one field set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectSelector {
    pub root: Option<String>,
    pub slug: Option<String>,
    pub repo: Option<String>,
}

/// The registry file handle.
pub struct ProjectRegistry {
    path: PathBuf,
}

impl ProjectRegistry {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `~/.wave/projects.json`, or a fallback under the current directory
    /// when no home is resolvable.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".wave")
            .join("projects.json")
    }

    /// Resolve a selector to exactly one project, registering new roots on
    /// first connect.
    pub fn resolve(&self, selector: &ProjectSelector) -> WaveResult<ProjectRecord> {
        let set = [
            selector.root.is_some(),
            selector.slug.is_some(),
            selector.repo.is_some(),
        ]
        .iter()
        .filter(|b| **b)
        .count();
        if set != 1 {
            return Err(WaveError::NotFound(
                "provide exactly one of root, slug, repo".into(),
            ));
        }

        if let Some(root) = &selector.root {
            return self.connect_root(Path::new(root));
        }

        let records = self.load()?;
        let mut matches: Vec<ProjectRecord> = records
            .into_iter()
            .filter(|r| match (&selector.slug, &selector.repo) {
                (Some(slug), _) => &r.slug == slug,
                (_, Some(repo)) => r.repo.as_deref() == Some(repo.as_str()),
                _ => false,
            })
            .collect();

        if matches.is_empty() {
            return Err(WaveError::NotFound(
                selector
                    .slug
                    .clone()
                    .or(selector.repo.clone())
                    .unwrap_or_default(),
            ));
        }
        if matches.len() > 1 {
            return Err(WaveError::MultipleCandidates {
                candidates: matches
                    .iter()
                    .map(|r| r.root.display().to_string())
                    .collect(),
            });
        }
        let record = matches.remove(0);
        self.touch(&record.id)?;
        Ok(record)
    }

    /// Bind by root path, validating and registering it when new.
    fn connect_root(&self, root: &Path) -> WaveResult<ProjectRecord> {
        let canonical = root.canonicalize().map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                WaveError::MissingPermissions(root.display().to_string())
            }
            _ => WaveError::InvalidRoot(root.display().to_string()),
        })?;
        if !canonical.is_dir() {
            return Err(WaveError::InvalidRoot(root.display().to_string()));
        }
        std::fs::read_dir(&canonical).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                WaveError::MissingPermissions(canonical.display().to_string())
            }
            _ => WaveError::InvalidRoot(canonical.display().to_string()),
        })?;

        self.update(|records| {
            let now = Utc::now();
            if let Some(existing) = records.iter_mut().find(|r| r.root == canonical) {
                existing.last_connected_at = now;
                return existing.clone();
            }
            let slug = canonical
                .file_name()
                .map(|n| crate::task::models::slugify(&n.to_string_lossy()))
                .unwrap_or_else(|| "project".into());
            let record = ProjectRecord {
                id: Uuid::now_v7(),
                slug,
                root: canonical.clone(),
                repo: detect_repo(&canonical),
                created_at: now,
                last_connected_at: now,
            };
            records.push(record.clone());
            record
        })
    }

    fn touch(&self, id: &Uuid) -> WaveResult<()> {
        self.update(|records| {
            if let Some(record) = records.iter_mut().find(|r| &r.id == id) {
                record.last_connected_at = Utc::now();
            }
        })?;
        Ok(())
    }

    /// All registered projects (shared lock).
    pub fn load(&self) -> WaveResult<Vec<ProjectRecord>> {
        let Ok(mut file) = File::open(&self.path) else {
            return Ok(Vec::new());
        };
        fs2::FileExt::lock_shared(&file)?;
        let mut body = String::new();
        let read = file.read_to_string(&mut body);
        fs2::FileExt::unlock(&file)?;
        read?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Read-modify-write under an exclusive lock.
    fn update<R>(&self, f: impl FnOnce(&mut Vec<ProjectRecord>) -> R) -> WaveResult<R> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        fs2::FileExt::lock_exclusive(&file)?;

        let result = (|| -> WaveResult<R> {
            let mut body = String::new();
            file.read_to_string(&mut body)?;
            let mut records: Vec<ProjectRecord> = if body.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&body)?
            };
            let value = f(&mut records);
            let out = serde_json::to_string_pretty(&records)?;
            file.seek(SeekFrom::Start(0))?;
            file.set_len(0)?;
            file.write_all(out.as_bytes())?;
            Ok(value)
        })();

        fs2::FileExt::unlock(&file)?;
        result
    }
}

/// Best-effort repo URL from `.git/config`.
fn detect_repo(root: &Path) -> Option<String> {
    let config = std::fs::read_to_string(root.join(".git/config")).ok()?;
    for line in config.lines() {
        let line = line.trim();
        if let Some(url) = line.strip_prefix("url = ") {
            return Some(url.trim().to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(tmp: &tempfile::TempDir) -> ProjectRegistry {
        ProjectRegistry::new(tmp.path().join("registry/projects.json"))
    }

    #[test]
    fn test_connect_by_root_registers() {
        let tmp = tempfile::tempdir().unwrap();
        let project = tmp.path().join("my-project");
        std::fs::create_dir_all(&project).unwrap();
        let registry = registry(&tmp);

        let selector = ProjectSelector {
            root: Some(project.display().to_string()),
            ..Default::default()
        };
        let record = registry.resolve(&selector).unwrap();
        assert_eq!(record.slug, "my-project");

        // Reconnecting by slug now resolves.
        let record2 = registry
            .resolve(&ProjectSelector {
                slug: Some("my-project".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(record.id, record2.id);
    }

    #[test]
    fn test_invalid_root_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry(&tmp);
        let err = registry
            .resolve(&ProjectSelector {
                root: Some(tmp.path().join("missing").display().to_string()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_ROOT");
    }

    #[test]
    fn test_unknown_slug_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry(&tmp);
        let err = registry
            .resolve(&ProjectSelector {
                slug: Some("nope".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_ambiguous_slug_lists_candidates() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry(&tmp);
        for parent in ["a", "b"] {
            let project = tmp.path().join(parent).join("same-name");
            std::fs::create_dir_all(&project).unwrap();
            registry
                .resolve(&ProjectSelector {
                    root: Some(project.display().to_string()),
                    ..Default::default()
                })
                .unwrap();
        }
        let err = registry
            .resolve(&ProjectSelector {
                slug: Some("same-name".into()),
                ..Default::default()
            })
            .unwrap_err();
        match err {
            WaveError::MultipleCandidates { candidates } => assert_eq!(candidates.len(), 2),
            other => panic!("expected MULTIPLE_CANDIDATES, got {:?}", other),
        }
    }

    #[test]
    fn test_selector_must_be_exactly_one() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry(&tmp);
        let err = registry.resolve(&ProjectSelector::default()).unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");

        let err = registry
            .resolve(&ProjectSelector {
                root: Some(".".into()),
                slug: Some("x".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
