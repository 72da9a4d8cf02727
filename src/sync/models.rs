//! Sync result models
//!
//! Typed records flowing through diff → resolve → apply. Content changes
//! are writable back to the task; status changes are reported only and are
//! never applied — status belongs to the structured task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::panel::fingerprint::SectionFingerprints;

/// Where a change came from. Sync only ever produces panel-sourced changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    Panel,
    Task,
}

/// One content difference, scoped to a section and optionally an entity id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentChange {
    /// Section name: `title`, `requirements`, `issues`, `hints`, `plan`,
    /// `step`, `evr`.
    pub section: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Field within the entity, or a structural marker such as `new_plan`.
    pub field: String,
    /// The panel-side value to write.
    pub value: Value,
    pub source: ChangeSource,
}

impl ContentChange {
    /// Key used to match a change against a resolved conflict.
    pub fn conflict_key(&self) -> (Option<&str>, &str) {
        (self.id.as_deref(), self.field.as_str())
    }
}

/// A change that survived conflict resolution and was applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedChange {
    #[serde(flatten)]
    pub change: ContentChange,
    pub applied_at: DateTime<Utc>,
}

/// A pending status difference, reported but never written back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    /// `plan`, `step`, or `evr`.
    pub target: String,
    pub id: String,
    pub old_status: String,
    pub new_status: String,
}

/// Why a difference is a conflict rather than a plain content change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// A side is missing its timestamp, so only the ETag could decide.
    EtagMismatch,
    /// Both sides mutated with timestamps present.
    ConcurrentUpdate,
}

/// A content conflict needing resolution. Limited to plan descriptions,
/// the one field both sides frequently mutate independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub plan_id: String,
    pub field: String,
    /// Task-side value.
    pub ours: String,
    /// Panel-side value.
    pub theirs: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_ts: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panel_ts: Option<DateTime<Utc>>,
    pub reason: ConflictReason,
}

/// Which side a resolved conflict keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Ours,
    Theirs,
    Merged,
}

/// A conflict with its resolution attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedConflict {
    #[serde(flatten)]
    pub conflict: Conflict,
    pub resolution: Resolution,
}

/// The difference detector's full output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PanelDiff {
    pub content_changes: Vec<ContentChange>,
    pub status_changes: Vec<StatusChange>,
    pub conflicts: Vec<Conflict>,
    /// Fingerprints computed from the raw panel text.
    pub fingerprints: SectionFingerprints,
}

impl PanelDiff {
    pub fn is_empty(&self) -> bool {
        self.content_changes.is_empty()
            && self.status_changes.is_empty()
            && self.conflicts.is_empty()
    }
}

/// One audit entry appended by the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEntry {
    Conflict {
        strategy: String,
        count: usize,
        resolutions: Vec<ResolvedConflict>,
        affected_ids: Vec<String>,
    },
    Sync {
        changes_count: usize,
        changes: Vec<AuditChange>,
        affected_ids: Vec<String>,
    },
}

/// Compact change record inside a sync audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditChange {
    pub section: String,
    pub field: String,
    pub source: ChangeSource,
}

/// The sync apply engine's result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub applied: bool,
    pub changes: Vec<AppliedChange>,
    pub conflicts: Vec<ResolvedConflict>,
    pub audit_entries: Vec<AuditEntry>,
    pub md_version: String,
    /// Pending status changes carried through for reporting.
    pub status_changes: Vec<StatusChange>,
}
