//! Difference detector
//!
//! Compares a parsed panel against the authoritative task. Content
//! differences become writable changes (the panel owns content); status
//! differences are reported as pending (the task owns status); plan
//! description differences additionally become conflicts, the one field
//! both sides mutate independently.

use serde_json::json;

use super::models::{
    ChangeSource, Conflict, ConflictReason, ContentChange, PanelDiff, StatusChange,
};
use crate::panel::fingerprint;
use crate::panel::models::{ParsedEvr, ParsedPanel, ParsedPlan, ParsedStep};
use crate::task::models::{Evr, Plan, Step, Task, VerifyExpect};

/// Compute the full difference between panel and task.
pub fn diff_panel(panel: &ParsedPanel, task: &Task) -> PanelDiff {
    let mut diff = PanelDiff {
        fingerprints: fingerprint::fingerprint_sections(&panel.raw_sections),
        ..Default::default()
    };

    diff_scalars(panel, task, &mut diff);
    diff_plans(panel, task, &mut diff);
    diff_evrs(panel, task, &mut diff);

    diff
}

fn change(section: &str, id: Option<&str>, field: &str, value: serde_json::Value) -> ContentChange {
    ContentChange {
        section: section.to_string(),
        id: id.map(str::to_string),
        field: field.to_string(),
        value,
        source: ChangeSource::Panel,
    }
}

fn diff_scalars(panel: &ParsedPanel, task: &Task, diff: &mut PanelDiff) {
    if panel.title != task.title {
        diff.content_changes
            .push(change("title", None, "title", json!(panel.title)));
    }
    if panel.requirements != task.requirements {
        diff.content_changes.push(change(
            "requirements",
            None,
            "items",
            json!(panel.requirements),
        ));
    }
    if panel.issues != task.issues {
        diff.content_changes
            .push(change("issues", None, "items", json!(panel.issues)));
    }
    // An empty panel hint list against a non-empty task list is presumed to
    // be a collapsed view, not a deletion.
    let hints_collapsed = panel.hints.is_empty() && !task.hints.is_empty();
    if !hints_collapsed && panel.hints != task.hints {
        diff.content_changes
            .push(change("hints", None, "items", json!(panel.hints)));
    }
}

fn diff_plans(panel: &ParsedPanel, task: &Task, diff: &mut PanelDiff) {
    for parsed in &panel.plans {
        let Some(stored) = task.plan_by_id(&parsed.id) else {
            diff.content_changes.push(change(
                "plan",
                Some(&parsed.id),
                "new_plan",
                serde_json::to_value(parsed).unwrap_or_default(),
            ));
            continue;
        };

        if parsed.text != stored.text {
            diff.content_changes.push(change(
                "plan",
                Some(&parsed.id),
                "text",
                json!(parsed.text),
            ));
            diff.conflicts.push(description_conflict(panel, parsed, stored));
        }
        if parsed.hints != stored.hints {
            diff.content_changes.push(change(
                "plan",
                Some(&parsed.id),
                "hints",
                json!(parsed.hints),
            ));
        }
        if parsed.context_tags != stored.context_tags {
            diff.content_changes.push(change(
                "plan",
                Some(&parsed.id),
                "context_tags",
                serde_json::to_value(&parsed.context_tags).unwrap_or_default(),
            ));
        }
        if parsed.status != stored.status {
            diff.status_changes.push(StatusChange {
                target: "plan".into(),
                id: parsed.id.clone(),
                old_status: stored.status.as_str().into(),
                new_status: parsed.status.as_str().into(),
            });
        }

        diff_steps(parsed, stored, diff);
    }

    for stored in &task.plans {
        if panel.plan_by_id(&stored.id).is_none() {
            diff.content_changes.push(change(
                "plan",
                Some(&stored.id),
                "deleted_plan",
                json!(stored.id),
            ));
        }
    }
}

fn diff_steps(parsed: &ParsedPlan, stored: &Plan, diff: &mut PanelDiff) {
    for step in &parsed.steps {
        let Some(stored_step) = stored.step_by_id(&step.id) else {
            diff.content_changes.push(change(
                "step",
                Some(&step.id),
                "new_step",
                json!({
                    "plan_id": stored.id,
                    "step": serde_json::to_value(step).unwrap_or_default(),
                }),
            ));
            continue;
        };
        if step.text != stored_step.text {
            diff.content_changes
                .push(change("step", Some(&step.id), "text", json!(step.text)));
        }
        if step.hints != stored_step.hints {
            diff.content_changes
                .push(change("step", Some(&step.id), "hints", json!(step.hints)));
        }
        if step.context_tags != stored_step.context_tags {
            diff.content_changes.push(change(
                "step",
                Some(&step.id),
                "context_tags",
                serde_json::to_value(&step.context_tags).unwrap_or_default(),
            ));
        }
        if step.status != stored_step.status {
            diff.status_changes.push(StatusChange {
                target: "step".into(),
                id: step.id.clone(),
                old_status: stored_step.status.as_str().into(),
                new_status: step.status.as_str().into(),
            });
        }
    }

    for stored_step in &stored.steps {
        if !parsed.steps.iter().any(|s| s.id == stored_step.id) {
            diff.content_changes.push(change(
                "step",
                Some(&stored_step.id),
                "deleted_step",
                json!({ "plan_id": stored.id }),
            ));
        }
    }
}

fn description_conflict(panel: &ParsedPanel, parsed: &ParsedPlan, stored: &Plan) -> Conflict {
    let panel_ts = panel.metadata.last_modified;
    let task_ts = Some(stored.updated_at);
    let reason = if panel_ts.is_none() || task_ts.is_none() {
        ConflictReason::EtagMismatch
    } else {
        ConflictReason::ConcurrentUpdate
    };
    Conflict {
        plan_id: parsed.id.clone(),
        field: "text".into(),
        ours: stored.text.clone(),
        theirs: parsed.text.clone(),
        task_ts,
        panel_ts,
        reason,
    }
}

/// Shape-insensitive equality for verify/expect: one row in the panel and a
/// single-item list in the task describe the same content.
fn verify_expect_eq(parsed: Option<&VerifyExpect>, stored: &VerifyExpect) -> bool {
    match parsed {
        // Absent rows are a collapsed view, not a deletion.
        None => true,
        Some(v) => v.as_items() == stored.as_items(),
    }
}

fn diff_evrs(panel: &ParsedPanel, task: &Task, diff: &mut PanelDiff) {
    for parsed in &panel.evrs {
        let Some(stored) = task.evr_by_id(&parsed.id) else {
            diff.content_changes.push(change(
                "evr",
                Some(&parsed.id),
                "new_evr",
                serde_json::to_value(parsed).unwrap_or_default(),
            ));
            continue;
        };

        if parsed.title != stored.title {
            diff.content_changes.push(change(
                "evr",
                Some(&parsed.id),
                "title",
                json!(parsed.title),
            ));
        }
        if !verify_expect_eq(parsed.verify.as_ref(), &stored.verify) {
            diff.content_changes.push(change(
                "evr",
                Some(&parsed.id),
                "verify",
                serde_json::to_value(parsed.verify.as_ref()).unwrap_or_default(),
            ));
        }
        if !verify_expect_eq(parsed.expect.as_ref(), &stored.expect) {
            diff.content_changes.push(change(
                "evr",
                Some(&parsed.id),
                "expect",
                serde_json::to_value(parsed.expect.as_ref()).unwrap_or_default(),
            ));
        }
        if parsed.status != stored.status {
            diff.status_changes.push(StatusChange {
                target: "evr".into(),
                id: parsed.id.clone(),
                old_status: stored.status.as_str().into(),
                new_status: parsed.status.as_str().into(),
            });
        }
    }

    for stored in &task.evrs {
        if panel.evr_by_id(&stored.id).is_none() {
            diff.content_changes.push(change(
                "evr",
                Some(&stored.id),
                "deleted_evr",
                json!(stored.id),
            ));
        }
    }
}

/// Build a [`Plan`] from a parsed plan, deriving EVR bindings from its
/// `evr` context tags.
pub fn plan_from_parsed(parsed: &ParsedPlan) -> Plan {
    let mut plan = Plan::new(parsed.id.clone(), parsed.text.clone());
    plan.status = parsed.status;
    plan.hints = parsed.hints.clone();
    plan.context_tags = parsed.context_tags.clone();
    plan.evr_bindings = parsed
        .context_tags
        .iter()
        .filter(|t| t.kind == crate::task::models::TagKind::Evr)
        .map(|t| t.value.clone())
        .collect();
    plan.steps = parsed.steps.iter().map(step_from_parsed).collect();
    plan
}

/// Build a [`Step`] from a parsed step, deriving `uses_evr` from its
/// `uses_evr` context tags.
pub fn step_from_parsed(parsed: &ParsedStep) -> Step {
    let mut step = Step::new(parsed.id.clone(), parsed.text.clone());
    step.status = parsed.status;
    step.hints = parsed.hints.clone();
    step.context_tags = parsed.context_tags.clone();
    step.uses_evr = parsed
        .context_tags
        .iter()
        .filter(|t| t.kind == crate::task::models::TagKind::UsesEvr)
        .map(|t| t.value.clone())
        .collect();
    step
}

/// Build an [`Evr`] from a parsed EVR. New EVRs start with no runs, so
/// their status is `unknown` regardless of the panel glyph.
pub fn evr_from_parsed(parsed: &ParsedEvr) -> Evr {
    let mut evr = Evr::new(
        parsed.id.clone(),
        parsed.title.clone(),
        parsed.verify.clone().unwrap_or_default(),
        parsed.expect.clone().unwrap_or_default(),
    );
    if let Some(class) = parsed.class {
        evr.class = class;
    }
    evr.notes = parsed.notes.clone();
    evr.proof = parsed.proof.clone();
    evr
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::parser::parse_panel;
    use crate::panel::renderer::{render_task, RenderOptions};
    use crate::task::models::{ItemStatus, TagKind};

    fn task_with_plan() -> Task {
        let mut task = Task::new("Unify Migration".into(), "goal".into());
        let plan = Plan::new("plan-1".into(), "Move schema".into());
        task.plans.push(plan);
        task
    }

    fn parse_rendered(task: &Task) -> ParsedPanel {
        let rendered = render_task(task, &[], &RenderOptions::default()).unwrap();
        parse_panel(&rendered.markdown).unwrap()
    }

    #[test]
    fn test_identical_inputs_produce_empty_diff() {
        let task = task_with_plan();
        let panel = parse_rendered(&task);
        let diff = diff_panel(&panel, &task);
        assert!(diff.content_changes.is_empty(), "{:?}", diff.content_changes);
        assert!(diff.status_changes.is_empty());
        assert!(diff.conflicts.is_empty());
    }

    #[test]
    fn test_status_edit_reports_pending_only() {
        let task = task_with_plan();
        let mut panel = parse_rendered(&task);
        panel.plans[0].status = ItemStatus::Completed;

        let diff = diff_panel(&panel, &task);
        assert!(diff.content_changes.is_empty());
        assert_eq!(diff.status_changes.len(), 1);
        let change = &diff.status_changes[0];
        assert_eq!(change.target, "plan");
        assert_eq!(change.id, "plan-1");
        assert_eq!(change.old_status, "to_do");
        assert_eq!(change.new_status, "completed");
    }

    #[test]
    fn test_description_edit_is_change_and_conflict() {
        let task = task_with_plan();
        let mut panel = parse_rendered(&task);
        panel.plans[0].text = "Move schema carefully".into();

        let diff = diff_panel(&panel, &task);
        assert_eq!(diff.content_changes.len(), 1);
        assert_eq!(diff.content_changes[0].field, "text");
        assert_eq!(diff.conflicts.len(), 1);
        // No panel timestamp: only the ETag could have decided.
        assert_eq!(diff.conflicts[0].reason, ConflictReason::EtagMismatch);
    }

    #[test]
    fn test_conflict_reason_with_both_timestamps() {
        let task = task_with_plan();
        let mut panel = parse_rendered(&task);
        panel.plans[0].text = "B".into();
        panel.metadata.last_modified = Some(chrono::Utc::now());

        let diff = diff_panel(&panel, &task);
        assert_eq!(diff.conflicts[0].reason, ConflictReason::ConcurrentUpdate);
    }

    #[test]
    fn test_collapsed_hints_do_not_emit_change() {
        let mut task = task_with_plan();
        task.hints = vec!["remember the index".into()];
        let mut panel = parse_rendered(&task);
        panel.hints.clear();

        let diff = diff_panel(&panel, &task);
        assert!(diff
            .content_changes
            .iter()
            .all(|c| c.section != "hints"));
    }

    #[test]
    fn test_new_and_deleted_plans() {
        let task = task_with_plan();
        let mut panel = parse_rendered(&task);
        panel.plans[0].id = "plan-unknown".into();

        let diff = diff_panel(&panel, &task);
        let fields: Vec<&str> = diff
            .content_changes
            .iter()
            .map(|c| c.field.as_str())
            .collect();
        assert!(fields.contains(&"new_plan"));
        assert!(fields.contains(&"deleted_plan"));
    }

    #[test]
    fn test_single_item_list_does_not_spuriously_diff() {
        let mut task = task_with_plan();
        let mut evr = Evr::new(
            "evr-1".into(),
            "Check".into(),
            VerifyExpect::Items(vec!["one command".into()]),
            VerifyExpect::Text("ok".into()),
        );
        evr.referenced_by = vec!["plan-1".into()];
        task.evrs.push(evr);

        let panel = parse_rendered(&task);
        // The rendered single-item list reparses as a scalar.
        assert_eq!(
            panel.evrs[0].verify,
            Some(VerifyExpect::Text("one command".into()))
        );
        let diff = diff_panel(&panel, &task);
        assert!(diff.content_changes.is_empty(), "{:?}", diff.content_changes);
    }

    #[test]
    fn test_plan_from_parsed_derives_bindings() {
        let parsed = ParsedPlan {
            id: "plan-9".into(),
            text: "p".into(),
            status: ItemStatus::ToDo,
            hints: vec![],
            context_tags: vec![crate::task::models::ContextTag {
                kind: TagKind::Evr,
                value: "evr-7".into(),
            }],
            steps: vec![],
            number_path: None,
        };
        let plan = plan_from_parsed(&parsed);
        assert_eq!(plan.evr_bindings, vec!["evr-7".to_string()]);
    }
}
