//! Sync apply engine
//!
//! Integrates a panel diff into the task: resolves conflicts, filters the
//! content changes they veto, applies the rest, emits audit entries, and
//! computes the new panel ETag. Status changes pass through untouched —
//! they are pending reports, not writes.

use chrono::Utc;
use tracing::warn;

use super::diff::{evr_from_parsed, plan_from_parsed, step_from_parsed};
use super::models::{
    AppliedChange, AuditChange, AuditEntry, ContentChange, PanelDiff, ResolvedConflict,
    Resolution, SyncOutcome,
};
use super::resolve::{resolve, Strategy};
use crate::panel::fingerprint;
use crate::panel::models::{ParsedEvr, ParsedPlan, ParsedStep};
use crate::task::models::{TagKind, Task, VerifyExpect};

/// Apply a diff to the task under the given strategy.
pub fn apply_diff(task: &mut Task, diff: PanelDiff, strategy: Strategy, skew_ms: i64) -> SyncOutcome {
    let resolved: Vec<ResolvedConflict> = diff
        .conflicts
        .into_iter()
        .map(|conflict| {
            let resolution = resolve(strategy, &conflict, skew_ms);
            ResolvedConflict {
                conflict,
                resolution,
            }
        })
        .collect();

    let now = Utc::now();
    let mut applied: Vec<AppliedChange> = Vec::new();
    for change in diff.content_changes {
        let vetoed = resolved.iter().any(|r| {
            r.resolution == Resolution::Ours
                && (Some(r.conflict.plan_id.as_str()), r.conflict.field.as_str())
                    == change.conflict_key()
        });
        if vetoed {
            continue;
        }
        if apply_change(task, &change) {
            applied.push(AppliedChange {
                change,
                applied_at: now,
            });
        }
    }

    let mut audit_entries = Vec::new();
    if !resolved.is_empty() {
        audit_entries.push(AuditEntry::Conflict {
            strategy: strategy.as_str().to_string(),
            count: resolved.len(),
            resolutions: resolved.clone(),
            affected_ids: resolved.iter().map(|r| r.conflict.plan_id.clone()).collect(),
        });
    }
    if !applied.is_empty() {
        audit_entries.push(AuditEntry::Sync {
            changes_count: applied.len(),
            changes: applied
                .iter()
                .map(|a| AuditChange {
                    section: a.change.section.clone(),
                    field: a.change.field.clone(),
                    source: a.change.source,
                })
                .collect(),
            affected_ids: applied
                .iter()
                .filter_map(|a| a.change.id.clone())
                .collect(),
        });
    }

    let md_version = fingerprint::md_version(&diff.fingerprints);
    let any_applied = !applied.is_empty();
    if any_applied {
        task.section_fingerprints = diff.fingerprints;
        task.md_version = md_version.clone();
        task.reindex_evr_references();
        task.touch();
    }

    SyncOutcome {
        applied: any_applied,
        changes: applied,
        conflicts: resolved,
        audit_entries,
        md_version,
        status_changes: diff.status_changes,
    }
}

/// Apply one content change. Returns false when the change no longer fits
/// the task shape (entity vanished, value unreadable); those are skipped,
/// not fatal.
fn apply_change(task: &mut Task, change: &ContentChange) -> bool {
    let now = Utc::now();
    match (change.section.as_str(), change.field.as_str()) {
        ("title", "title") => match change.value.as_str() {
            Some(title) => {
                task.title = title.to_string();
                true
            }
            None => false,
        },
        ("requirements", "items") => assign_list(&change.value, &mut task.requirements),
        ("issues", "items") => assign_list(&change.value, &mut task.issues),
        ("hints", "items") => assign_list(&change.value, &mut task.hints),

        ("plan", "text") => with_plan(task, change, |plan, value| {
            if let Some(text) = value.as_str() {
                plan.text = text.to_string();
                plan.updated_at = now;
                true
            } else {
                false
            }
        }),
        ("plan", "hints") => with_plan(task, change, |plan, value| {
            let ok = assign_list(value, &mut plan.hints);
            if ok {
                plan.updated_at = now;
            }
            ok
        }),
        ("plan", "context_tags") => with_plan(task, change, |plan, value| {
            match serde_json::from_value(value.clone()) {
                Ok(tags) => {
                    plan.context_tags = tags;
                    plan.evr_bindings = plan
                        .context_tags
                        .iter()
                        .filter(|t| t.kind == TagKind::Evr)
                        .map(|t| t.value.clone())
                        .collect();
                    plan.updated_at = now;
                    true
                }
                Err(e) => {
                    warn!("unreadable context_tags change: {}", e);
                    false
                }
            }
        }),
        ("plan", "new_plan") => match serde_json::from_value::<ParsedPlan>(change.value.clone()) {
            Ok(parsed) => {
                task.plans.push(plan_from_parsed(&parsed));
                true
            }
            Err(e) => {
                warn!("unreadable new_plan change: {}", e);
                false
            }
        },
        ("plan", "deleted_plan") => {
            let Some(id) = change.id.as_deref() else {
                return false;
            };
            let before = task.plans.len();
            task.plans.retain(|p| p.id != id);
            if task.current_plan_id.as_deref() == Some(id) {
                task.current_plan_id = None;
            }
            task.plans.len() != before
        }

        ("step", "text") => with_step(task, change, |step, value| {
            if let Some(text) = value.as_str() {
                step.text = text.to_string();
                step.updated_at = now;
                true
            } else {
                false
            }
        }),
        ("step", "hints") => with_step(task, change, |step, value| {
            let ok = assign_list(value, &mut step.hints);
            if ok {
                step.updated_at = now;
            }
            ok
        }),
        ("step", "context_tags") => with_step(task, change, |step, value| {
            match serde_json::from_value(value.clone()) {
                Ok(tags) => {
                    step.context_tags = tags;
                    step.uses_evr = step
                        .context_tags
                        .iter()
                        .filter(|t| t.kind == TagKind::UsesEvr)
                        .map(|t| t.value.clone())
                        .collect();
                    step.updated_at = now;
                    true
                }
                Err(e) => {
                    warn!("unreadable step context_tags change: {}", e);
                    false
                }
            }
        }),
        ("step", "new_step") => {
            let plan_id = change.value.get("plan_id").and_then(|v| v.as_str());
            let parsed = change
                .value
                .get("step")
                .cloned()
                .and_then(|v| serde_json::from_value::<ParsedStep>(v).ok());
            match (plan_id, parsed) {
                (Some(plan_id), Some(parsed)) => match task.plan_by_id_mut(plan_id) {
                    Some(plan) => {
                        plan.steps.push(step_from_parsed(&parsed));
                        plan.updated_at = now;
                        true
                    }
                    None => false,
                },
                _ => false,
            }
        }
        ("step", "deleted_step") => {
            let Some(step_id) = change.id.as_deref() else {
                return false;
            };
            let Some(plan_id) = change.value.get("plan_id").and_then(|v| v.as_str()) else {
                return false;
            };
            match task.plan_by_id_mut(plan_id) {
                Some(plan) => {
                    let before = plan.steps.len();
                    plan.steps.retain(|s| s.id != step_id);
                    plan.steps.len() != before
                }
                None => false,
            }
        }

        ("evr", "title") => with_evr(task, change, |evr, value| {
            if let Some(title) = value.as_str() {
                evr.title = title.to_string();
                true
            } else {
                false
            }
        }),
        ("evr", "verify") => with_evr(task, change, |evr, value| {
            match serde_json::from_value::<VerifyExpect>(value.clone()) {
                Ok(v) => {
                    evr.verify = v;
                    true
                }
                Err(_) => false,
            }
        }),
        ("evr", "expect") => with_evr(task, change, |evr, value| {
            match serde_json::from_value::<VerifyExpect>(value.clone()) {
                Ok(v) => {
                    evr.expect = v;
                    true
                }
                Err(_) => false,
            }
        }),
        ("evr", "new_evr") => match serde_json::from_value::<ParsedEvr>(change.value.clone()) {
            Ok(parsed) => {
                task.evrs.push(evr_from_parsed(&parsed));
                true
            }
            Err(e) => {
                warn!("unreadable new_evr change: {}", e);
                false
            }
        },
        ("evr", "deleted_evr") => {
            let Some(id) = change.id.as_deref() else {
                return false;
            };
            let before = task.evrs.len();
            task.evrs.retain(|e| e.id != id);
            task.evrs.len() != before
        }

        (section, field) => {
            warn!("unknown content change {}/{}", section, field);
            false
        }
    }
}

fn assign_list(value: &serde_json::Value, target: &mut Vec<String>) -> bool {
    match value.as_array() {
        Some(items) => {
            *target = items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            true
        }
        None => false,
    }
}

fn with_plan(
    task: &mut Task,
    change: &ContentChange,
    f: impl FnOnce(&mut crate::task::models::Plan, &serde_json::Value) -> bool,
) -> bool {
    let Some(id) = change.id.as_deref() else {
        return false;
    };
    match task.plan_by_id_mut(id) {
        Some(plan) => f(plan, &change.value),
        None => false,
    }
}

fn with_step(
    task: &mut Task,
    change: &ContentChange,
    f: impl FnOnce(&mut crate::task::models::Step, &serde_json::Value) -> bool,
) -> bool {
    let Some(id) = change.id.as_deref() else {
        return false;
    };
    for plan in &mut task.plans {
        if let Some(step) = plan.step_by_id_mut(id) {
            return f(step, &change.value);
        }
    }
    false
}

fn with_evr(
    task: &mut Task,
    change: &ContentChange,
    f: impl FnOnce(&mut crate::task::models::Evr, &serde_json::Value) -> bool,
) -> bool {
    let Some(id) = change.id.as_deref() else {
        return false;
    };
    match task.evr_by_id_mut(id) {
        Some(evr) => f(evr, &change.value),
        None => false,
    }
}
