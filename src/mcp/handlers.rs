//! MCP tool handlers
//!
//! Implements the logic behind each tool. Domain failures become coded
//! `{success: false, error_code, ...}` bodies; only malformed tool calls
//! (unknown tool, missing required argument) surface as transport-level
//! tool errors.
//!
//! Mutating tools reconcile the panel first — the lazy sync: parse the
//! on-disk panel, diff against the task, resolve conflicts, apply content
//! changes, log the audit trail — then run their own operation under the
//! same write lock. Reads compute a sync preview without persisting it.

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use crate::error::{WaveError, WaveResult};
use crate::evr::{self, gate};
use crate::panel::models::ParsedPanel;
use crate::panel::parser::parse_panel;
use crate::project::{ProjectBinding, ProjectRegistry, ProjectSelector};
use crate::sync::cache::SyncCache;
use crate::sync::diff::diff_panel;
use crate::sync::engine::apply_diff;
use crate::sync::models::SyncOutcome;
use crate::sync::resolve::Strategy;
use crate::task::models::{
    mint_id, Actor, ContextTag, Evr, EvrClass, EvrRun, EvrStatus, ItemStatus, LogEntry, LogLevel,
    TagKind, Task, VerifyExpect,
};
use crate::task::store::{audit_to_log, TaskStore};

/// Margin before the panel file's mtime outranks its front-matter
/// timestamp; absorbs the write-then-stat skew of our own renders.
const MTIME_TRUST_MARGIN_SECS: i64 = 2;

/// Handles MCP tool calls for one session.
pub struct ToolHandler {
    registry: ProjectRegistry,
    binding: Option<ProjectBinding>,
    cache: SyncCache,
    actor: String,
}

impl ToolHandler {
    pub fn new(registry: ProjectRegistry) -> Self {
        Self {
            registry,
            binding: None,
            cache: SyncCache::default(),
            actor: "ai".to_string(),
        }
    }

    /// Handle a tool call, returning the JSON body for the text content.
    pub async fn handle(&mut self, name: &str, args: Option<Value>) -> Result<Value> {
        let args = args.unwrap_or_else(|| json!({}));
        match name {
            "project_info" => self.project_info().await,
            "connect_project" => self.connect_project(&args).await,
            "current_task_init" => self.task_init(&args).await,
            "current_task_read" => self.task_read(&args).await,
            "current_task_update" => self.task_update(&args).await,
            "current_task_modify" => self.task_modify(&args).await,
            "current_task_complete" => self.task_complete(&args).await,
            "current_task_log" => self.task_log(&args).await,
            _ => Err(anyhow!("unknown tool: {}", name)),
        }
    }

    fn store(&self) -> WaveResult<std::sync::Arc<TaskStore>> {
        self.binding
            .as_ref()
            .map(|b| b.store.clone())
            .ok_or(WaveError::NoProjectBound)
    }

    // ------------------------------------------------------------------
    // project_info / connect_project
    // ------------------------------------------------------------------

    async fn project_info(&self) -> Result<Value> {
        let Some(binding) = &self.binding else {
            return Ok(json!({
                "success": true,
                "connected": false,
                "next_action": "connect_project",
            }));
        };
        let active = binding.store.load_active().await.ok().flatten();
        let recent = binding.store.recent_tasks(5).await;
        let next_action = match &active {
            Some(task) if !task.is_completed() => "current_task_read",
            _ => "current_task_init",
        };
        Ok(json!({
            "success": true,
            "connected": true,
            "project": project_json(&binding.record),
            "active_task": active.as_ref().map(task_summary),
            "recent_tasks": recent,
            "next_action": next_action,
        }))
    }

    async fn connect_project(&mut self, args: &Value) -> Result<Value> {
        let selector = ProjectSelector {
            root: opt_string(args, "root"),
            slug: opt_string(args, "slug"),
            repo: opt_string(args, "repo"),
        };
        let record = match self.registry.resolve(&selector) {
            Ok(record) => record,
            Err(e) => return Ok(e.to_body()),
        };
        info!(slug = %record.slug, root = %record.root.display(), "session bound to project");
        let binding = ProjectBinding::new(record);
        let has_task = binding
            .store
            .load_active()
            .await
            .ok()
            .flatten()
            .map(|t| !t.is_completed())
            .unwrap_or(false);
        let body = json!({
            "success": true,
            "project": project_json(&binding.record),
            "next_action": if has_task { "current_task_read" } else { "current_task_init" },
        });
        self.binding = Some(binding);
        Ok(body)
    }

    // ------------------------------------------------------------------
    // current_task_init
    // ------------------------------------------------------------------

    async fn task_init(&self, args: &Value) -> Result<Value> {
        let store = match self.store() {
            Ok(store) => store,
            Err(e) => return Ok(e.to_body()),
        };
        let title = required_str(args, "title")?;
        let goal = required_str(args, "goal")?;
        let plans: Vec<String> = args
            .get("plans")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        match store
            .init_task(title.to_string(), goal.to_string(), plans, &self.actor)
            .await
        {
            Ok(task) => Ok(json!({
                "success": true,
                "task": serde_json::to_value(&task)?,
                "md_version": task.md_version,
                "next_action": "current_task_update",
            })),
            Err(e) => Ok(e.to_body()),
        }
    }

    // ------------------------------------------------------------------
    // current_task_read
    // ------------------------------------------------------------------

    async fn task_read(&self, args: &Value) -> Result<Value> {
        let body = self.task_read_inner(args).await;
        Ok(body.unwrap_or_else(|e| e.to_body()))
    }

    async fn task_read_inner(&self, args: &Value) -> WaveResult<Value> {
        let store = self.store()?;
        let task = store.load_active().await?.ok_or(WaveError::NoActiveTask)?;
        let strategy = strategy_from(args);

        let panel = self.read_parsed(&store).await?;
        let mut panel_pending = Vec::new();
        let mut sync_preview = None;
        let mut panel_meta = None;

        if let Some((parsed, text)) = &panel {
            let task_json = serde_json::to_string(&task)?;
            let request_id = opt_string(args, "request_id");
            let cached = request_id
                .as_deref()
                .and_then(|rid| self.cache.get(rid, text, &task_json));
            let outcome = match cached {
                Some(outcome) => outcome,
                None => {
                    // Preview on a clone; reads never persist sync results.
                    let mut preview = task.clone();
                    let diff = diff_panel(parsed, &preview);
                    let outcome = apply_diff(&mut preview, diff, strategy, 0);
                    if let Some(rid) = request_id.as_deref() {
                        self.cache.put(rid, text, &task_json, outcome.clone());
                    }
                    outcome
                }
            };
            panel_pending = outcome.status_changes.clone();
            if !outcome.changes.is_empty() || !outcome.conflicts.is_empty() {
                sync_preview = Some(serde_json::to_value(&outcome)?);
            }
            panel_meta = Some(json!({
                "fixes": parsed.fixes,
                "parse_warnings": parsed.parse_errors,
            }));
        }

        let logs = store.read_logs().await?;
        let summary = evr::summarize(&task);

        let mut body = json!({
            "success": true,
            "task": serde_json::to_value(&task)?,
            "md_version": task.md_version,
            "evr_ready": gate::check_task_gate(&task).is_ok(),
            "evr_summary": serde_json::to_value(&summary)?,
            "evr_details": evr::details(&task),
            "panel_pending": panel_pending,
            "logs_highlights": log_highlights(&logs),
            "logs_full_count": logs.len(),
        });
        if let Some(preview) = sync_preview {
            body["sync_preview"] = preview;
        }
        if let Some(meta) = panel_meta {
            body["panel_metadata"] = meta;
        }
        Ok(body)
    }

    // ------------------------------------------------------------------
    // current_task_update
    // ------------------------------------------------------------------

    async fn task_update(&self, args: &Value) -> Result<Value> {
        let store = match self.store() {
            Ok(store) => store,
            Err(e) => return Ok(e.to_body()),
        };
        let target = required_str(args, "target")?.to_string();
        let id = required_str(args, "id")?.to_string();
        let strategy = strategy_from(args);
        let expected_version = args.get("expected_version").and_then(|v| v.as_u64());
        let evidence = opt_string(args, "evidence");
        let notes = opt_string(args, "notes");
        let proof = opt_string(args, "proof");
        let status_label = opt_string(args, "status");
        let actor_label = opt_string(args, "actor").unwrap_or_else(|| self.actor.clone());

        let parsed = match self.read_parsed(&store).await {
            Ok(p) => p.map(|(panel, _)| panel),
            Err(e) => return Ok(e.to_body()),
        };

        let result = store
            .mutate(&self.actor, expected_version, None, |task, logs| {
                let sync = reconcile(task, parsed.as_ref(), strategy, logs);
                let extra = match target.as_str() {
                    "plan" => update_plan_status(task, &id, status_label.as_deref(), evidence, notes, logs)?,
                    "step" => update_step_status(task, &id, status_label.as_deref(), evidence, notes, logs)?,
                    "evr" => {
                        record_evr_run(task, &id, status_label.as_deref(), &actor_label, notes, proof, logs)?
                    }
                    other => {
                        return Err(WaveError::EvrValidationFailed(format!(
                            "unknown update target `{}`",
                            other
                        )))
                    }
                };
                Ok((extra, sync))
            })
            .await;

        match result {
            Ok((task, (extra, sync))) => {
                let mut body = json!({
                    "success": true,
                    "task": serde_json::to_value(&task)?,
                    "md_version": task.md_version,
                });
                if let Some(extra) = extra {
                    body["evr_for_node"] = json!(extra);
                }
                if let Some(sync) = sync {
                    body["sync"] = sync_summary(&sync)?;
                }
                Ok(body)
            }
            Err(e) => Ok(e.to_body()),
        }
    }

    // ------------------------------------------------------------------
    // current_task_modify
    // ------------------------------------------------------------------

    async fn task_modify(&self, args: &Value) -> Result<Value> {
        let store = match self.store() {
            Ok(store) => store,
            Err(e) => return Ok(e.to_body()),
        };
        let target = required_str(args, "target")?.to_string();
        let strategy = strategy_from(args);
        let expected_version = args.get("expected_version").and_then(|v| v.as_u64());
        let id = opt_string(args, "id");
        let value = args.get("value").cloned();
        let op = opt_string(args, "op");
        let plan_id = opt_string(args, "plan_id");
        let evr_fields = args.get("evr").cloned();

        let parsed = match self.read_parsed(&store).await {
            Ok(p) => p.map(|(panel, _)| panel),
            Err(e) => return Ok(e.to_body()),
        };

        let result = store
            .mutate(&self.actor, expected_version, None, |task, logs| {
                let sync = reconcile(task, parsed.as_ref(), strategy, logs);
                let modified = apply_modify(
                    task,
                    &target,
                    id.as_deref(),
                    value.as_ref(),
                    op.as_deref(),
                    plan_id.as_deref(),
                    evr_fields.as_ref(),
                )?;
                logs.push(LogEntry {
                    at: Utc::now(),
                    level: LogLevel::Info,
                    category: "task".into(),
                    action: "modify".into(),
                    message: format!("modified {}", target),
                    ai_notes: None,
                });
                Ok((modified, sync))
            })
            .await;

        match result {
            Ok((task, (modified, sync))) => {
                let mut body = json!({
                    "success": true,
                    "task": serde_json::to_value(&task)?,
                    "md_version": task.md_version,
                });
                if let Some(id) = modified {
                    body["modified_id"] = json!(id);
                }
                if let Some(sync) = sync {
                    body["sync"] = sync_summary(&sync)?;
                }
                Ok(body)
            }
            Err(e) => Ok(e.to_body()),
        }
    }

    // ------------------------------------------------------------------
    // current_task_complete
    // ------------------------------------------------------------------

    async fn task_complete(&self, args: &Value) -> Result<Value> {
        let store = match self.store() {
            Ok(store) => store,
            Err(e) => return Ok(e.to_body()),
        };
        let strategy = strategy_from(args);
        let expected_version = args.get("expected_version").and_then(|v| v.as_u64());

        let parsed = match self.read_parsed(&store).await {
            Ok(p) => p.map(|(panel, _)| panel),
            Err(e) => return Ok(e.to_body()),
        };

        let result = store
            .mutate(&self.actor, expected_version, None, |task, logs| {
                reconcile(task, parsed.as_ref(), strategy, logs);
                if let Err(required) = gate::check_task_gate(task) {
                    let summary = serde_json::to_value(evr::summarize(task)).unwrap_or_default();
                    return Err(WaveError::EvrNotReady { required, summary });
                }
                task.completed_at = Some(Utc::now());
                logs.push(LogEntry {
                    at: Utc::now(),
                    level: LogLevel::Info,
                    category: "task".into(),
                    action: "complete".into(),
                    message: format!("task completed: {}", task.title),
                    ai_notes: None,
                });
                Ok(())
            })
            .await;

        match result {
            Ok((task, ())) => Ok(json!({
                "success": true,
                "task": serde_json::to_value(&task)?,
                "md_version": task.md_version,
                "evr_summary": serde_json::to_value(evr::summarize(&task))?,
            })),
            Err(e) => Ok(e.to_body()),
        }
    }

    // ------------------------------------------------------------------
    // current_task_log
    // ------------------------------------------------------------------

    async fn task_log(&self, args: &Value) -> Result<Value> {
        let store = match self.store() {
            Ok(store) => store,
            Err(e) => return Ok(e.to_body()),
        };
        let message = required_str(args, "message")?.to_string();
        let level = match opt_string(args, "level").as_deref() {
            None => LogLevel::Info,
            Some(label) => match label.to_ascii_uppercase().as_str() {
                "INFO" => LogLevel::Info,
                "WARN" | "WARNING" => LogLevel::Warn,
                "ERROR" => LogLevel::Error,
                other => return Err(anyhow!("unknown log level: {}", other)),
            },
        };
        let entry = LogEntry {
            at: Utc::now(),
            level,
            category: opt_string(args, "category").unwrap_or_else(|| "note".into()),
            action: opt_string(args, "action").unwrap_or_else(|| "append".into()),
            message,
            ai_notes: opt_string(args, "ai_notes"),
        };
        let strategy = strategy_from(args);

        let parsed = match self.read_parsed(&store).await {
            Ok(p) => p.map(|(panel, _)| panel),
            Err(e) => return Ok(e.to_body()),
        };

        let result = store
            .mutate(&self.actor, None, None, |task, logs| {
                reconcile(task, parsed.as_ref(), strategy, logs);
                logs.push(entry);
                Ok(())
            })
            .await;
        match result {
            Ok((task, ())) => Ok(json!({
                "success": true,
                "md_version": task.md_version,
                "version": task.version,
            })),
            Err(e) => Ok(e.to_body()),
        }
    }

    // ------------------------------------------------------------------
    // Panel helpers
    // ------------------------------------------------------------------

    /// Read and parse the on-disk panel. The front-matter timestamp is the
    /// panel's clock; the file mtime outranks it only when clearly later
    /// (a human saved the file after our render).
    async fn read_parsed(&self, store: &TaskStore) -> WaveResult<Option<(ParsedPanel, String)>> {
        let Some((text, mtime)) = store.read_panel().await? else {
            return Ok(None);
        };
        let mut parsed = parse_panel(&text)?;
        match (parsed.metadata.last_modified, mtime) {
            (None, Some(m)) => parsed.metadata.last_modified = Some(m),
            (Some(fm), Some(m))
                if m.signed_duration_since(fm).num_seconds() > MTIME_TRUST_MARGIN_SECS =>
            {
                parsed.metadata.last_modified = Some(m)
            }
            _ => {}
        }
        Ok(Some((parsed, text)))
    }
}

// ----------------------------------------------------------------------
// Mutation helpers (pure functions of the task, run inside the store lock)
// ----------------------------------------------------------------------

/// The lazy sync step shared by all mutating tools.
fn reconcile(
    task: &mut Task,
    parsed: Option<&ParsedPanel>,
    strategy: Strategy,
    logs: &mut Vec<LogEntry>,
) -> Option<SyncOutcome> {
    let parsed = parsed?;
    let diff = diff_panel(parsed, task);
    if diff.is_empty() {
        return None;
    }
    let outcome = apply_diff(task, diff, strategy, 0);
    for entry in &outcome.audit_entries {
        logs.push(audit_to_log(entry));
    }
    Some(outcome)
}

fn update_plan_status(
    task: &mut Task,
    id: &str,
    status_label: Option<&str>,
    evidence: Option<String>,
    notes: Option<String>,
    logs: &mut Vec<LogEntry>,
) -> WaveResult<Option<Vec<String>>> {
    let Some(plan) = task.plan_by_id(id) else {
        return Err(WaveError::NotFound(format!("plan {}", id)));
    };
    let old = plan.status;
    let mut evr_for_node = None;

    if let Some(label) = status_label {
        let new = ItemStatus::from_label(label).ok_or_else(|| {
            WaveError::InvalidStateTransition {
                from: old.as_str().into(),
                to: label.into(),
            }
        })?;
        if !old.can_transition(new) {
            return Err(WaveError::InvalidStateTransition {
                from: old.as_str().into(),
                to: new.as_str().into(),
            });
        }
        if new == ItemStatus::Completed {
            if let Err(pending) = gate::check_plan_gate(task, plan) {
                return Err(WaveError::PlanGateBlocked {
                    plan_id: id.to_string(),
                    evr_for_plan: pending,
                });
            }
        }
        if new == ItemStatus::InProgress {
            evr_for_node = Some(plan.evr_bindings.clone());
        }

        let now = Utc::now();
        let Some(plan) = task.plan_by_id_mut(id) else {
            return Err(WaveError::NotFound(format!("plan {}", id)));
        };
        plan.status = new;
        plan.updated_at = now;
        plan.completed_at = (new == ItemStatus::Completed).then_some(now);
        if new == ItemStatus::InProgress {
            task.set_current_plan(id);
        }
        logs.push(LogEntry {
            at: now,
            level: LogLevel::Info,
            category: "plan".into(),
            action: "status".into(),
            message: format!("plan {}: {} -> {}", id, old.as_str(), new.as_str()),
            ai_notes: None,
        });
    }

    if evidence.is_some() || notes.is_some() {
        let Some(plan) = task.plan_by_id_mut(id) else {
            return Err(WaveError::NotFound(format!("plan {}", id)));
        };
        if evidence.is_some() {
            plan.evidence = evidence;
        }
        if notes.is_some() {
            plan.notes = notes;
        }
        plan.updated_at = Utc::now();
    }

    Ok(evr_for_node)
}

fn update_step_status(
    task: &mut Task,
    id: &str,
    status_label: Option<&str>,
    evidence: Option<String>,
    notes: Option<String>,
    logs: &mut Vec<LogEntry>,
) -> WaveResult<Option<Vec<String>>> {
    let mut found = false;
    for plan in &mut task.plans {
        let Some(step) = plan.step_by_id_mut(id) else {
            continue;
        };
        found = true;
        let old = step.status;
        if let Some(label) = status_label {
            let new = ItemStatus::from_label(label).ok_or_else(|| {
                WaveError::InvalidStateTransition {
                    from: old.as_str().into(),
                    to: label.into(),
                }
            })?;
            if !old.can_transition(new) {
                return Err(WaveError::InvalidStateTransition {
                    from: old.as_str().into(),
                    to: new.as_str().into(),
                });
            }
            let now = Utc::now();
            step.status = new;
            step.updated_at = now;
            step.completed_at = (new == ItemStatus::Completed).then_some(now);
            logs.push(LogEntry {
                at: now,
                level: LogLevel::Info,
                category: "step".into(),
                action: "status".into(),
                message: format!("step {}: {} -> {}", id, old.as_str(), new.as_str()),
                ai_notes: None,
            });
        }
        if evidence.is_some() {
            step.evidence = evidence.clone();
        }
        if notes.is_some() {
            step.notes = notes.clone();
        }
        break;
    }
    if !found {
        return Err(WaveError::NotFound(format!("step {}", id)));
    }
    Ok(None)
}

fn record_evr_run(
    task: &mut Task,
    id: &str,
    status_label: Option<&str>,
    actor_label: &str,
    notes: Option<String>,
    proof: Option<String>,
    logs: &mut Vec<LogEntry>,
) -> WaveResult<Option<Vec<String>>> {
    let status = status_label
        .and_then(EvrStatus::from_label)
        .ok_or_else(|| {
            WaveError::EvrValidationFailed(
                "an EVR run requires status pass, fail, skip, or unknown".into(),
            )
        })?;
    let actor = match actor_label {
        "ai" => Actor::Ai,
        "user" => Actor::User,
        "ci" => Actor::Ci,
        other => {
            return Err(WaveError::EvrValidationFailed(format!(
                "unknown actor `{}`",
                other
            )))
        }
    };
    let Some(evr) = task.evr_by_id_mut(id) else {
        return Err(WaveError::NotFound(format!("evr {}", id)));
    };
    let run = EvrRun {
        at: Utc::now(),
        actor,
        status,
        notes,
        proof,
    };
    evr.record_run(run);
    logs.push(LogEntry {
        at: Utc::now(),
        level: LogLevel::Info,
        category: "evr".into(),
        action: "run".into(),
        message: format!("evr {}: {} run by {}", id, status.as_str(), actor_label),
        ai_notes: None,
    });
    Ok(None)
}

fn apply_modify(
    task: &mut Task,
    target: &str,
    id: Option<&str>,
    value: Option<&Value>,
    op: Option<&str>,
    plan_id: Option<&str>,
    evr_fields: Option<&Value>,
) -> WaveResult<Option<String>> {
    match target {
        "goal" => {
            task.goal = str_value(value, "goal")?;
            Ok(None)
        }
        "title" => {
            // The slug (and with it the task directory) stays as minted.
            task.title = str_value(value, "title")?;
            Ok(None)
        }
        "hints" => {
            task.hints = list_value(value, "hints")?;
            Ok(None)
        }
        "requirements" => {
            task.requirements = list_value(value, "requirements")?;
            Ok(None)
        }
        "issues" => {
            task.issues = list_value(value, "issues")?;
            Ok(None)
        }
        "plan_text" => {
            let id = id.ok_or_else(|| WaveError::NotFound("plan id required".into()))?;
            let text = str_value(value, "plan_text")?;
            let Some(plan) = task.plan_by_id_mut(id) else {
                return Err(WaveError::NotFound(format!("plan {}", id)));
            };
            plan.text = text;
            plan.updated_at = Utc::now();
            Ok(Some(id.to_string()))
        }
        "plan_hints" => {
            let id = id.ok_or_else(|| WaveError::NotFound("plan id required".into()))?;
            let hints = list_value(value, "plan_hints")?;
            let Some(plan) = task.plan_by_id_mut(id) else {
                return Err(WaveError::NotFound(format!("plan {}", id)));
            };
            plan.hints = hints;
            plan.updated_at = Utc::now();
            Ok(Some(id.to_string()))
        }
        "step_text" | "step_hints" => {
            let id = id.ok_or_else(|| WaveError::NotFound("step id required".into()))?;
            for plan in &mut task.plans {
                if let Some(step) = plan.step_by_id_mut(id) {
                    if target == "step_text" {
                        step.text = str_value(value, "step_text")?;
                    } else {
                        step.hints = list_value(value, "step_hints")?;
                    }
                    step.updated_at = Utc::now();
                    return Ok(Some(id.to_string()));
                }
            }
            Err(WaveError::NotFound(format!("step {}", id)))
        }
        "evr" => modify_evr(task, id, op, plan_id, evr_fields),
        other => Err(WaveError::EvrValidationFailed(format!(
            "unknown modify target `{}`",
            other
        ))),
    }
}

/// EVRs are created, updated, and removed only through modify, and creation
/// binds the new EVR to a specific plan.
fn modify_evr(
    task: &mut Task,
    id: Option<&str>,
    op: Option<&str>,
    plan_id: Option<&str>,
    fields: Option<&Value>,
) -> WaveResult<Option<String>> {
    match op.unwrap_or("update") {
        "create" => {
            let plan_id = plan_id.ok_or_else(|| {
                WaveError::EvrValidationFailed("evr create requires plan_id".into())
            })?;
            if task.plan_by_id(plan_id).is_none() {
                return Err(WaveError::NotFound(format!("plan {}", plan_id)));
            }
            let fields = fields.ok_or_else(|| {
                WaveError::EvrValidationFailed("evr create requires an evr object".into())
            })?;
            let title = fields
                .get("title")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    WaveError::EvrValidationFailed("evr create requires a title".into())
                })?;
            let evr_id = mint_id("evr");
            let mut evr = Evr::new(
                evr_id.clone(),
                title.to_string(),
                verify_expect_from(fields.get("verify")),
                verify_expect_from(fields.get("expect")),
            );
            if let Some(class) = fields
                .get("class")
                .and_then(|v| v.as_str())
                .and_then(EvrClass::from_label)
            {
                evr.class = class;
            }
            task.evrs.push(evr);

            if let Some(plan) = task.plan_by_id_mut(plan_id) {
                plan.evr_bindings.push(evr_id.clone());
                plan.context_tags.push(ContextTag {
                    kind: TagKind::Evr,
                    value: evr_id.clone(),
                });
                plan.updated_at = Utc::now();
            }
            task.reindex_evr_references();
            Ok(Some(evr_id))
        }
        "update" => {
            let id = id.ok_or_else(|| {
                WaveError::EvrValidationFailed("evr update requires an id".into())
            })?;
            let fields = fields.ok_or_else(|| {
                WaveError::EvrValidationFailed("evr update requires an evr object".into())
            })?;
            let Some(evr) = task.evr_by_id_mut(id) else {
                return Err(WaveError::NotFound(format!("evr {}", id)));
            };
            if let Some(title) = fields.get("title").and_then(|v| v.as_str()) {
                evr.title = title.to_string();
            }
            if fields.get("verify").is_some() {
                evr.verify = verify_expect_from(fields.get("verify"));
            }
            if fields.get("expect").is_some() {
                evr.expect = verify_expect_from(fields.get("expect"));
            }
            if let Some(class) = fields
                .get("class")
                .and_then(|v| v.as_str())
                .and_then(EvrClass::from_label)
            {
                evr.class = class;
            }
            if let Some(notes) = fields.get("notes").and_then(|v| v.as_str()) {
                evr.notes = Some(notes.to_string());
            }
            if let Some(proof) = fields.get("proof").and_then(|v| v.as_str()) {
                evr.proof = Some(proof.to_string());
            }
            Ok(Some(id.to_string()))
        }
        "remove" => {
            let id = id.ok_or_else(|| {
                WaveError::EvrValidationFailed("evr remove requires an id".into())
            })?;
            let before = task.evrs.len();
            task.evrs.retain(|e| e.id != id);
            if task.evrs.len() == before {
                return Err(WaveError::NotFound(format!("evr {}", id)));
            }
            for plan in &mut task.plans {
                plan.evr_bindings.retain(|b| b != id);
                plan.context_tags
                    .retain(|t| !(t.kind == TagKind::Evr && t.value == id));
            }
            task.reindex_evr_references();
            Ok(Some(id.to_string()))
        }
        other => Err(WaveError::EvrValidationFailed(format!(
            "unknown evr op `{}`",
            other
        ))),
    }
}

// ----------------------------------------------------------------------
// Small helpers
// ----------------------------------------------------------------------

fn opt_string(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("{} is required", key))
}

fn strategy_from(args: &Value) -> Strategy {
    args.get("strategy")
        .and_then(|v| v.as_str())
        .and_then(Strategy::from_label)
        .unwrap_or(Strategy::TsOnly)
}

fn str_value(value: Option<&Value>, what: &str) -> WaveResult<String> {
    value
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| WaveError::EvrValidationFailed(format!("{} requires a string value", what)))
}

fn list_value(value: Option<&Value>, what: &str) -> WaveResult<Vec<String>> {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .ok_or_else(|| {
            WaveError::EvrValidationFailed(format!("{} requires an array of strings", what))
        })
}

fn verify_expect_from(value: Option<&Value>) -> VerifyExpect {
    match value {
        Some(Value::String(s)) => VerifyExpect::Text(s.clone()),
        Some(Value::Array(items)) => VerifyExpect::Items(
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ),
        _ => VerifyExpect::default(),
    }
}

fn project_json(record: &crate::project::ProjectRecord) -> Value {
    json!({
        "id": record.id,
        "slug": record.slug,
        "root": record.root.display().to_string(),
        "repo": record.repo,
    })
}

fn task_summary(task: &Task) -> Value {
    json!({
        "id": task.id,
        "title": task.title,
        "slug": task.slug,
        "version": task.version,
        "md_version": task.md_version,
        "current_plan_id": task.current_plan_id,
        "completed_at": task.completed_at,
    })
}

fn sync_summary(outcome: &SyncOutcome) -> Result<Value> {
    Ok(json!({
        "applied": outcome.applied,
        "changes_count": outcome.changes.len(),
        "conflicts_count": outcome.conflicts.len(),
        "status_pending": outcome.status_changes,
        "md_version": outcome.md_version,
    }))
}

/// Warnings and errors plus the latest few entries, capped.
fn log_highlights(logs: &[LogEntry]) -> Vec<Value> {
    let mut picked: Vec<usize> = logs
        .iter()
        .enumerate()
        .filter(|(_, l)| l.level != LogLevel::Info)
        .map(|(i, _)| i)
        .collect();
    picked.extend(logs.len().saturating_sub(3)..logs.len());
    picked.sort_unstable();
    picked.dedup();
    if picked.len() > 10 {
        picked = picked.split_off(picked.len() - 10);
    }
    picked
        .into_iter()
        .filter_map(|i| serde_json::to_value(&logs[i]).ok())
        .collect()
}
