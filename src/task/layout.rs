//! On-disk layout of the `.wave` directory
//!
//! Per-project root:
//!
//! ```text
//! <project>/.wave/
//!   ACTIVE                         relative path of the active task dir
//!   tasks/YYYY/MM/DD/<slug>--<id8>/
//!     task.json                    authoritative aggregate
//!     current.md                   rendered panel
//!     logs.jsonl                   append-only log stream
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};

use super::models::Task;

pub const TASK_JSON: &str = "task.json";
pub const CURRENT_MD: &str = "current.md";
pub const LOGS_JSONL: &str = "logs.jsonl";
const ACTIVE_POINTER: &str = "ACTIVE";

/// Path helper for one project's `.wave` directory.
#[derive(Debug, Clone)]
pub struct WaveLayout {
    root: PathBuf,
}

impl WaveLayout {
    pub fn new(project_root: &Path) -> Self {
        Self {
            root: project_root.join(".wave"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.root.join("tasks")
    }

    /// `tasks/YYYY/MM/DD/<slug>--<id8>` for a creation date.
    pub fn task_dir(&self, slug: &str, id8: &str, created_at: DateTime<Utc>) -> PathBuf {
        self.tasks_dir()
            .join(format!("{:04}", created_at.year()))
            .join(format!("{:02}", created_at.month()))
            .join(format!("{:02}", created_at.day()))
            .join(format!("{}--{}", slug, id8))
    }

    pub fn task_dir_for(&self, task: &Task) -> PathBuf {
        self.task_dir(&task.slug, &task.id8(), task.created_at)
    }

    pub fn active_pointer(&self) -> PathBuf {
        self.root.join(ACTIVE_POINTER)
    }

    /// Resolve the active task directory from the pointer file.
    pub fn read_active(&self) -> Option<PathBuf> {
        let rel = std::fs::read_to_string(self.active_pointer()).ok()?;
        let rel = rel.trim();
        if rel.is_empty() {
            return None;
        }
        let dir = self.root.join(rel);
        dir.is_dir().then_some(dir)
    }

    /// All task directories, newest first. The dated layout makes the
    /// lexicographic order chronological.
    pub fn list_task_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        let years = read_sorted(&self.tasks_dir());
        for year in years {
            for month in read_sorted(&year) {
                for day in read_sorted(&month) {
                    dirs.extend(read_sorted(&day));
                }
            }
        }
        dirs.reverse();
        dirs
    }
}

fn read_sorted(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    paths.sort();
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_dir_shape() {
        let layout = WaveLayout::new(Path::new("/proj"));
        let created: DateTime<Utc> = "2026-07-04T12:00:00Z".parse().unwrap();
        let dir = layout.task_dir("unify-migration", "0198a1b2", created);
        assert_eq!(
            dir,
            PathBuf::from("/proj/.wave/tasks/2026/07/04/unify-migration--0198a1b2")
        );
    }

    #[test]
    fn test_list_task_dirs_newest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = WaveLayout::new(tmp.path());
        for (date, name) in [
            ("2026/06/30", "older--aaaa0000"),
            ("2026/07/01", "newer--bbbb0000"),
        ] {
            let dir = layout.tasks_dir().join(date).join(name);
            std::fs::create_dir_all(&dir).unwrap();
        }
        let dirs = layout.list_task_dirs();
        assert_eq!(dirs.len(), 2);
        assert!(dirs[0].ends_with("2026/07/01/newer--bbbb0000"));
    }
}
