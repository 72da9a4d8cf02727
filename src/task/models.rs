//! Task aggregate and related models
//!
//! The structured task is authoritative for status fields (plan/step/EVR
//! state); the Markdown panel is authoritative for content fields (titles,
//! descriptions, hints, requirements, issues, verify/expect text, tags).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::panel::fingerprint::SectionFingerprints;

/// Status shared by plans and steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    ToDo,
    InProgress,
    Completed,
    Blocked,
}

impl ItemStatus {
    /// Stable string label used in tool payloads and status-change reports.
    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::ToDo => "to_do",
            ItemStatus::InProgress => "in_progress",
            ItemStatus::Completed => "completed",
            ItemStatus::Blocked => "blocked",
        }
    }

    /// Parse a status label.
    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "to_do" => Some(ItemStatus::ToDo),
            "in_progress" => Some(ItemStatus::InProgress),
            "completed" => Some(ItemStatus::Completed),
            "blocked" => Some(ItemStatus::Blocked),
            _ => None,
        }
    }

    /// Whether a direct transition to `to` is admitted.
    ///
    /// Blocked work must be unblocked before it can complete; everything
    /// else may move freely (including reopening completed items).
    pub fn can_transition(self, to: ItemStatus) -> bool {
        !(self == ItemStatus::Blocked && to == ItemStatus::Completed)
    }
}

/// EVR verification status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvrStatus {
    Pass,
    Fail,
    Skip,
    Unknown,
}

impl EvrStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EvrStatus::Pass => "pass",
            EvrStatus::Fail => "fail",
            EvrStatus::Skip => "skip",
            EvrStatus::Unknown => "unknown",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "pass" => Some(EvrStatus::Pass),
            "fail" => Some(EvrStatus::Fail),
            "skip" => Some(EvrStatus::Skip),
            "unknown" => Some(EvrStatus::Unknown),
            _ => None,
        }
    }
}

/// EVR verification class.
///
/// Static EVRs are one-shot assertions; runtime EVRs need fresh evidence
/// near completion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvrClass {
    Runtime,
    Static,
}

impl EvrClass {
    pub fn as_str(self) -> &'static str {
        match self {
            EvrClass::Runtime => "runtime",
            EvrClass::Static => "static",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "runtime" => Some(EvrClass::Runtime),
            "static" => Some(EvrClass::Static),
            _ => None,
        }
    }
}

/// Who produced an EVR run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Ai,
    User,
    Ci,
}

/// Verify/expect content: a single string or an ordered list.
///
/// The distinction is preserved across parse/render round-trips; a
/// single-item list never collapses to a scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VerifyExpect {
    Text(String),
    Items(Vec<String>),
}

impl VerifyExpect {
    /// Items in order, regardless of shape.
    pub fn as_items(&self) -> Vec<&str> {
        match self {
            VerifyExpect::Text(s) => vec![s.as_str()],
            VerifyExpect::Items(items) => items.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            VerifyExpect::Text(s) => s.is_empty(),
            VerifyExpect::Items(items) => items.is_empty(),
        }
    }
}

impl Default for VerifyExpect {
    fn default() -> Self {
        VerifyExpect::Text(String::new())
    }
}

/// One recorded verification run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvrRun {
    pub at: DateTime<Utc>,
    pub actor: Actor,
    pub status: EvrStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<String>,
}

/// Expected Visible Result: a verification procedure with an expected
/// outcome whose satisfaction gates plan/task completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evr {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub verify: VerifyExpect,
    #[serde(default)]
    pub expect: VerifyExpect,
    pub status: EvrStatus,
    pub class: EvrClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<String>,
    /// Plan ids that bind this EVR. Kept as id lookups, not back-pointers.
    #[serde(default)]
    pub referenced_by: Vec<String>,
    /// Run history, oldest first.
    #[serde(default)]
    pub runs: Vec<EvrRun>,
}

impl Evr {
    /// Create an EVR with no runs yet.
    pub fn new(id: String, title: String, verify: VerifyExpect, expect: VerifyExpect) -> Self {
        Self {
            id,
            title,
            verify,
            expect,
            status: EvrStatus::Unknown,
            class: EvrClass::Runtime,
            last_run: None,
            notes: None,
            proof: None,
            referenced_by: Vec::new(),
            runs: Vec::new(),
        }
    }

    /// The most recent run, if any.
    pub fn latest_run(&self) -> Option<&EvrRun> {
        self.runs.last()
    }

    /// Append a run and keep `status`/`last_run` consistent with it.
    pub fn record_run(&mut self, run: EvrRun) {
        self.status = run.status;
        self.last_run = Some(run.at);
        if run.notes.is_some() {
            self.notes = run.notes.clone();
        }
        if run.proof.is_some() {
            self.proof = run.proof.clone();
        }
        self.runs.push(run);
    }
}

/// Context tag kinds recognized at plan/step level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagKind {
    Ref,
    Decision,
    Discuss,
    Inputs,
    Constraints,
    Evr,
    UsesEvr,
}

impl TagKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TagKind::Ref => "ref",
            TagKind::Decision => "decision",
            TagKind::Discuss => "discuss",
            TagKind::Inputs => "inputs",
            TagKind::Constraints => "constraints",
            TagKind::Evr => "evr",
            TagKind::UsesEvr => "uses_evr",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "ref" => Some(TagKind::Ref),
            "decision" => Some(TagKind::Decision),
            "discuss" => Some(TagKind::Discuss),
            "inputs" => Some(TagKind::Inputs),
            "constraints" => Some(TagKind::Constraints),
            "evr" => Some(TagKind::Evr),
            "uses_evr" => Some(TagKind::UsesEvr),
            _ => None,
        }
    }
}

/// A `(kind, value)` tag attached to a plan or step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextTag {
    pub kind: TagKind,
    pub value: String,
}

/// A step inside a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub text: String,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub hints: Vec<String>,
    /// EVR ids this step only references (read-only, not gating).
    #[serde(default)]
    pub uses_evr: Vec<String>,
    #[serde(default)]
    pub context_tags: Vec<ContextTag>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn new(id: String, text: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            text,
            status: ItemStatus::ToDo,
            evidence: None,
            notes: None,
            hints: Vec::new(),
            uses_evr: Vec::new(),
            context_tags: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// A plan: an ordered group of steps with its own EVR bindings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub text: String,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub hints: Vec<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// EVR ids this plan must satisfy before it may complete.
    #[serde(default)]
    pub evr_bindings: Vec<String>,
    #[serde(default)]
    pub context_tags: Vec<ContextTag>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Plan {
    pub fn new(id: String, text: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            text,
            status: ItemStatus::ToDo,
            evidence: None,
            notes: None,
            hints: Vec::new(),
            steps: Vec::new(),
            evr_bindings: Vec::new(),
            context_tags: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn step_by_id(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_by_id_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == id)
    }
}

/// Where the task came from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_range: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

/// Log entry severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// One append-only log entry. Entries are never edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub category: String,
    pub action: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_notes: Option<String>,
}

/// The task aggregate root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub goal: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    #[serde(default)]
    pub hints: Vec<String>,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub plans: Vec<Plan>,
    #[serde(default)]
    pub evrs: Vec<Evr>,
    /// Id of the plan currently holding the `current` role, duplicated here
    /// so readers never scan for it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_plan_id: Option<String>,
    /// ETag of the last rendered panel.
    #[serde(default)]
    pub md_version: String,
    #[serde(default)]
    pub section_fingerprints: SectionFingerprints,
    /// Optimistic-concurrency counter; incremented by every admitted write.
    #[serde(default)]
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_by: Option<String>,
}

impl Task {
    /// Create a fresh task. The id is time-ordered so directory listings
    /// sort by creation.
    pub fn new(title: String, goal: String) -> Self {
        let now = Utc::now();
        let slug = slugify(&title);
        Self {
            id: Uuid::now_v7(),
            title,
            slug,
            goal,
            created_at: now,
            updated_at: now,
            completed_at: None,
            provenance: None,
            hints: Vec::new(),
            requirements: Vec::new(),
            issues: Vec::new(),
            plans: Vec::new(),
            evrs: Vec::new(),
            current_plan_id: None,
            md_version: String::new(),
            section_fingerprints: SectionFingerprints::default(),
            version: 0,
            modified_by: None,
        }
    }

    /// First 8 hex chars of the id, used in the task directory name.
    pub fn id8(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn plan_by_id(&self, id: &str) -> Option<&Plan> {
        self.plans.iter().find(|p| p.id == id)
    }

    pub fn plan_by_id_mut(&mut self, id: &str) -> Option<&mut Plan> {
        self.plans.iter_mut().find(|p| p.id == id)
    }

    pub fn evr_by_id(&self, id: &str) -> Option<&Evr> {
        self.evrs.iter().find(|e| e.id == id)
    }

    pub fn evr_by_id_mut(&mut self, id: &str) -> Option<&mut Evr> {
        self.evrs.iter_mut().find(|e| e.id == id)
    }

    /// Find the step with `id` and the plan that owns it.
    pub fn step_by_id(&self, id: &str) -> Option<(&Plan, &Step)> {
        for plan in &self.plans {
            if let Some(step) = plan.step_by_id(id) {
                return Some((plan, step));
            }
        }
        None
    }

    /// Make `plan_id` the current plan, demoting any other in-progress plan.
    ///
    /// Keeps the invariant that exactly one plan holds the current role and
    /// `current_plan_id` points at it.
    pub fn set_current_plan(&mut self, plan_id: &str) {
        let target_exists = self.plans.iter().any(|p| p.id == plan_id);
        if !target_exists {
            return;
        }
        let now = Utc::now();
        for plan in &mut self.plans {
            if plan.id != plan_id && plan.status == ItemStatus::InProgress {
                plan.status = ItemStatus::ToDo;
                plan.updated_at = now;
            }
        }
        self.current_plan_id = Some(plan_id.to_string());
    }

    /// Refresh `updated_at` after a mutation.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Recompute every EVR's `referenced_by` from the plans' bindings.
    pub fn reindex_evr_references(&mut self) {
        for evr in &mut self.evrs {
            evr.referenced_by.clear();
        }
        let bindings: Vec<(String, Vec<String>)> = self
            .plans
            .iter()
            .map(|p| (p.id.clone(), p.evr_bindings.clone()))
            .collect();
        for (plan_id, evr_ids) in bindings {
            for evr_id in evr_ids {
                if let Some(evr) = self.evrs.iter_mut().find(|e| e.id == evr_id) {
                    if !evr.referenced_by.contains(&plan_id) {
                        evr.referenced_by.push(plan_id.clone());
                    }
                }
            }
        }
    }
}

/// Mint a stable entity id with an 8-char time-ordered suffix.
///
/// The suffix mixes the low timestamp bits of a v7 UUID with its random
/// tail, so ids minted in one session sort roughly by creation while two
/// mints in the same millisecond still differ.
pub fn mint_id(prefix: &str) -> String {
    let s = Uuid::now_v7().simple().to_string();
    format!("{}-{}{}", prefix, &s[8..12], &s[28..32])
}

/// Derive a URL-safe slug from a title.
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "task".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_status_labels_round_trip() {
        for status in [
            ItemStatus::ToDo,
            ItemStatus::InProgress,
            ItemStatus::Completed,
            ItemStatus::Blocked,
        ] {
            assert_eq!(ItemStatus::from_label(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_blocked_cannot_complete_directly() {
        assert!(!ItemStatus::Blocked.can_transition(ItemStatus::Completed));
        assert!(ItemStatus::Blocked.can_transition(ItemStatus::InProgress));
        assert!(ItemStatus::InProgress.can_transition(ItemStatus::Completed));
    }

    #[test]
    fn test_evr_status_follows_latest_run() {
        let mut evr = Evr::new(
            "evr-1".into(),
            "Build passes".into(),
            VerifyExpect::Text("cargo build".into()),
            VerifyExpect::Text("exit 0".into()),
        );
        assert_eq!(evr.status, EvrStatus::Unknown);
        assert!(evr.latest_run().is_none());

        evr.record_run(EvrRun {
            at: Utc::now(),
            actor: Actor::Ai,
            status: EvrStatus::Fail,
            notes: None,
            proof: None,
        });
        assert_eq!(evr.status, EvrStatus::Fail);

        evr.record_run(EvrRun {
            at: Utc::now(),
            actor: Actor::User,
            status: EvrStatus::Pass,
            notes: Some("verified locally".into()),
            proof: None,
        });
        assert_eq!(evr.status, EvrStatus::Pass);
        assert_eq!(evr.runs.len(), 2);
        assert_eq!(evr.notes.as_deref(), Some("verified locally"));
    }

    #[test]
    fn test_verify_expect_preserves_shape() {
        let scalar = VerifyExpect::Text("run tests".into());
        let single = VerifyExpect::Items(vec!["run tests".into()]);
        assert_ne!(scalar, single);
        assert_eq!(scalar.as_items(), single.as_items());
    }

    #[test]
    fn test_verify_expect_serde_shapes() {
        let scalar: VerifyExpect = serde_json::from_str(r#""one""#).unwrap();
        assert_eq!(scalar, VerifyExpect::Text("one".into()));

        let list: VerifyExpect = serde_json::from_str(r#"["one"]"#).unwrap();
        assert_eq!(list, VerifyExpect::Items(vec!["one".into()]));

        assert_eq!(serde_json::to_string(&scalar).unwrap(), r#""one""#);
        assert_eq!(serde_json::to_string(&list).unwrap(), r#"["one"]"#);
    }

    #[test]
    fn test_set_current_plan_demotes_others() {
        let mut task = Task::new("Demo".into(), "goal".into());
        let mut a = Plan::new("plan-a".into(), "first".into());
        a.status = ItemStatus::InProgress;
        let b = Plan::new("plan-b".into(), "second".into());
        task.plans = vec![a, b];
        task.current_plan_id = Some("plan-a".into());

        task.set_current_plan("plan-b");
        assert_eq!(task.current_plan_id.as_deref(), Some("plan-b"));
        assert_eq!(task.plan_by_id("plan-a").unwrap().status, ItemStatus::ToDo);
    }

    #[test]
    fn test_reindex_evr_references() {
        let mut task = Task::new("Demo".into(), "goal".into());
        let mut plan = Plan::new("plan-a".into(), "p".into());
        plan.evr_bindings = vec!["evr-1".into()];
        task.plans = vec![plan];
        task.evrs = vec![Evr::new(
            "evr-1".into(),
            "t".into(),
            VerifyExpect::default(),
            VerifyExpect::default(),
        )];

        task.reindex_evr_references();
        assert_eq!(task.evrs[0].referenced_by, vec!["plan-a".to_string()]);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Unify Migration"), "unify-migration");
        assert_eq!(slugify("  Fix  the -- bug!  "), "fix-the-bug");
        assert_eq!(slugify("!!!"), "task");
    }

    #[test]
    fn test_mint_id_shape() {
        let id = mint_id("plan");
        assert!(id.starts_with("plan-"));
        assert_eq!(id.len(), "plan-".len() + 8);
        assert_ne!(mint_id("plan"), mint_id("plan"));
    }

    #[test]
    fn test_task_serialization_round_trip() {
        let mut task = Task::new("Serialize".into(), "goal".into());
        task.plans.push(Plan::new("plan-1".into(), "p1".into()));
        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(task.id, back.id);
        assert_eq!(back.plans.len(), 1);
        assert_eq!(back.plans[0].status, ItemStatus::ToDo);
    }
}
