//! Canonical panel renderer
//!
//! Emits deterministic Markdown from a task: fixed section order, 2-space
//! indent unit, canonical checkbox glyphs, and exactly one anchor comment
//! per plan/step/EVR line. Parsing the output yields an equivalent
//! structure, and re-rendering an already-anchored document never changes
//! ids.

use std::collections::HashSet;

use chrono::{DateTime, SecondsFormat, Utc};

use super::anchors::AnchorKind;
use super::fingerprint::{self, SectionFingerprints};
use super::glyphs;
use super::models::{RawSections, Section};
use crate::error::{WaveError, WaveResult};
use crate::task::models::{mint_id, LogEntry, Plan, Task};

/// Rendering options.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Emit YAML front matter with `md_version` and `last_modified`.
    pub front_matter: bool,
    /// Timestamp for the front matter; defaults to now.
    pub last_modified: Option<DateTime<Utc>>,
}

/// An id the renderer minted for an entity that lacked one.
#[derive(Debug, Clone)]
pub struct MintedId {
    pub kind: AnchorKind,
    pub id: String,
}

/// The rendered panel plus everything callers need to persist it.
#[derive(Debug, Clone)]
pub struct RenderedPanel {
    pub markdown: String,
    /// Ids minted during this render; callers persist them on the task.
    pub minted: Vec<MintedId>,
    pub sections: RawSections,
    pub fingerprints: SectionFingerprints,
    pub md_version: String,
}

struct Emitter {
    minted: Vec<MintedId>,
    used_ids: HashSet<String>,
}

impl Emitter {
    fn claim(&mut self, kind: AnchorKind, id: &str) -> WaveResult<String> {
        let id = if id.is_empty() {
            let mut candidate = mint_id(kind.prefix());
            while self.used_ids.contains(&candidate) {
                candidate = mint_id(kind.prefix());
            }
            self.minted.push(MintedId {
                kind,
                id: candidate.clone(),
            });
            candidate
        } else {
            id.to_string()
        };
        if !self.used_ids.insert(id.clone()) {
            return Err(WaveError::RenderError(format!(
                "duplicate {} anchor id `{}`",
                kind.prefix(),
                id
            )));
        }
        Ok(id)
    }
}

/// Render a task (and its log slice) into the canonical panel.
pub fn render_task(task: &Task, logs: &[LogEntry], opts: &RenderOptions) -> WaveResult<RenderedPanel> {
    let mut emitter = Emitter {
        minted: Vec::new(),
        used_ids: HashSet::new(),
    };
    let mut sections = RawSections::default();
    let mut out = String::new();

    // Title
    let title_line = format!("# Task: {}", task.title);
    sections.title = title_line.clone();
    out.push_str(&title_line);
    out.push_str("\n\n");

    // Requirements / Issues as plain bullets
    let req_body: Vec<String> = task.requirements.iter().map(|r| format!("- {}", r)).collect();
    sections.requirements = req_body.join("\n");
    push_section(&mut out, Section::Requirements, &req_body);

    let issue_body: Vec<String> = task.issues.iter().map(|i| format!("- {}", i)).collect();
    sections.issues = issue_body.join("\n");
    push_section(&mut out, Section::Issues, &issue_body);

    // Task-level hints
    let hint_body: Vec<String> = task.hints.iter().map(|h| format!("> {}", h)).collect();
    sections.hints = hint_body.join("\n");
    push_section(&mut out, Section::Hints, &hint_body);

    // Plans & Steps
    out.push_str(&format!("## {}\n\n", Section::Plans.heading()));
    for (index, plan) in task.plans.iter().enumerate() {
        let block = render_plan(plan, index + 1, &mut emitter)?;
        let plan_id = block.0;
        let lines = block.1;
        out.push_str(&lines.join("\n"));
        out.push('\n');
        if index + 1 < task.plans.len() {
            out.push('\n');
        }
        sections.plans.insert(plan_id, lines.join("\n"));
    }
    out.push('\n');

    // Expected Visible Results
    out.push_str(&format!("## {}\n\n", Section::Evrs.heading()));
    for (index, evr) in task.evrs.iter().enumerate() {
        let id = emitter.claim(AnchorKind::Evr, &evr.id)?;
        let mut lines = Vec::new();
        lines.push(format!(
            "{}. [{}] {} <!-- evr:{} -->",
            index + 1,
            glyphs::evr_status_glyph(evr.status),
            evr.title,
            id
        ));
        for item in evr.verify.as_items() {
            lines.push(format!("  - [verify] {}", item));
        }
        for item in evr.expect.as_items() {
            lines.push(format!("  - [expect] {}", item));
        }
        lines.push(format!("  - [status] {}", evr.status.as_str()));
        lines.push(format!("  - [class] {}", evr.class.as_str()));
        if let Some(last_run) = evr.last_run {
            lines.push(format!("  - [last_run] {}", iso(last_run)));
        }
        if let Some(notes) = &evr.notes {
            lines.push(format!("  - [notes] {}", notes));
        }
        if let Some(proof) = &evr.proof {
            lines.push(format!("  - [proof] {}", proof));
        }
        out.push_str(&lines.join("\n"));
        out.push('\n');
        sections.evrs.insert(id, lines.join("\n"));
    }
    out.push('\n');

    // Logs
    let log_body: Vec<String> = logs.iter().flat_map(render_log_entry).collect();
    sections.logs = log_body.join("\n");
    push_section(&mut out, Section::Logs, &log_body);

    let markdown_body = normalize_trailing(&out);
    let fingerprints = fingerprint::fingerprint_sections(&sections);
    let md_version = fingerprint::md_version(&fingerprints);

    let markdown = if opts.front_matter {
        let last_modified = opts.last_modified.unwrap_or_else(Utc::now);
        format!(
            "---\nmd_version: {}\nlast_modified: {}\n---\n{}",
            md_version,
            iso(last_modified),
            markdown_body
        )
    } else {
        markdown_body
    };

    Ok(RenderedPanel {
        markdown,
        minted: emitter.minted,
        sections,
        fingerprints,
        md_version,
    })
}

fn render_plan(
    plan: &Plan,
    number: usize,
    emitter: &mut Emitter,
) -> WaveResult<(String, Vec<String>)> {
    let plan_id = emitter.claim(AnchorKind::Plan, &plan.id)?;
    let mut lines = Vec::new();
    lines.push(format!(
        "{}. [{}] {} <!-- plan:{} -->",
        number,
        glyphs::item_status_glyph(plan.status),
        plan.text,
        plan_id
    ));
    for hint in &plan.hints {
        lines.push(format!("  > {}", hint));
    }
    for tag in &plan.context_tags {
        lines.push(format!("  - [{}] {}", tag.kind.as_str(), tag.value));
    }
    for (step_index, step) in plan.steps.iter().enumerate() {
        let step_id = emitter.claim(AnchorKind::Step, &step.id)?;
        lines.push(format!(
            "  {}.{}. [{}] {} <!-- step:{} -->",
            number,
            step_index + 1,
            glyphs::item_status_glyph(step.status),
            step.text,
            step_id
        ));
        for hint in &step.hints {
            lines.push(format!("    > {}", hint));
        }
        for tag in &step.context_tags {
            lines.push(format!("    - [{}] {}", tag.kind.as_str(), tag.value));
        }
    }
    Ok((plan_id, lines))
}

/// Log line format: `[ISO] LEVEL CATEGORY/ACTION: message`, with an
/// indented `AI Notes:` continuation when present.
fn render_log_entry(entry: &LogEntry) -> Vec<String> {
    let mut lines = vec![format!(
        "[{}] {} {}/{}: {}",
        iso(entry.at),
        entry.level.as_str(),
        entry.category,
        entry.action,
        entry.message
    )];
    if let Some(notes) = &entry.ai_notes {
        lines.push(format!("  AI Notes: {}", notes));
    }
    lines
}

fn push_section(out: &mut String, section: Section, body: &[String]) {
    out.push_str(&format!("## {}\n\n", section.heading()));
    if !body.is_empty() {
        out.push_str(&body.join("\n"));
        out.push('\n');
    }
    out.push('\n');
}

fn iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Collapse runs of blank lines at the end and make sure the document ends
/// with a single newline.
fn normalize_trailing(text: &str) -> String {
    let mut s = text.trim_end().to_string();
    s.push('\n');
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::parser::parse_panel;
    use crate::task::models::{
        ContextTag, Evr, EvrClass, EvrStatus, ItemStatus, LogLevel, Step, TagKind, VerifyExpect,
    };

    fn sample_task() -> Task {
        let mut task = Task::new("Unify Migration".into(), "merge the stores".into());
        task.requirements = vec!["keep data intact".into()];
        task.hints = vec!["coordinate with infra".into()];

        let mut plan = Plan::new("plan-1".into(), "Move schema".into());
        plan.status = ItemStatus::InProgress;
        plan.hints = vec!["users table first".into()];
        plan.context_tags = vec![ContextTag {
            kind: TagKind::Evr,
            value: "evr-1".into(),
        }];
        plan.evr_bindings = vec!["evr-1".into()];
        let mut step = Step::new("step-1".into(), "Write migration".into());
        step.status = ItemStatus::Completed;
        step.hints = vec!["idempotent".into()];
        plan.steps.push(step);
        task.plans.push(plan);
        task.plans
            .push(Plan::new("plan-2".into(), "Cut over".into()));

        let mut evr = Evr::new(
            "evr-1".into(),
            "Migration applies".into(),
            VerifyExpect::Text("migrate --dry-run".into()),
            VerifyExpect::Items(vec!["exit 0".into(), "no warnings".into()]),
        );
        evr.class = EvrClass::Static;
        task.evrs.push(evr);
        task
    }

    #[test]
    fn test_render_title_line() {
        let rendered = render_task(&sample_task(), &[], &RenderOptions::default()).unwrap();
        assert!(rendered.markdown.contains("# Task: Unify Migration"));
    }

    #[test]
    fn test_round_trip_preserves_structure() {
        let task = sample_task();
        let rendered = render_task(&task, &[], &RenderOptions::default()).unwrap();
        let parsed = parse_panel(&rendered.markdown).unwrap();

        assert_eq!(parsed.title, "Unify Migration");
        assert_eq!(parsed.requirements, vec!["keep data intact".to_string()]);
        assert_eq!(parsed.hints, vec!["coordinate with infra".to_string()]);
        assert_eq!(parsed.plans.len(), 2);
        assert_eq!(parsed.plans[0].id, "plan-1");
        assert_eq!(parsed.plans[0].status, ItemStatus::InProgress);
        assert_eq!(parsed.plans[0].hints, vec!["users table first".to_string()]);
        assert_eq!(parsed.plans[0].steps[0].id, "step-1");
        assert_eq!(parsed.plans[0].steps[0].status, ItemStatus::Completed);
        assert_eq!(parsed.evrs.len(), 1);
        assert_eq!(parsed.evrs[0].id, "evr-1");
        assert_eq!(
            parsed.evrs[0].expect,
            Some(VerifyExpect::Items(vec![
                "exit 0".into(),
                "no warnings".into()
            ]))
        );
        assert!(parsed.fixes.is_empty(), "canonical output needs no fixes");
        assert!(parsed.parse_errors.is_empty());
    }

    #[test]
    fn test_render_is_stable_across_round_trip() {
        let task = sample_task();
        let first = render_task(&task, &[], &RenderOptions::default()).unwrap();
        let second = render_task(&task, &[], &RenderOptions::default()).unwrap();
        assert_eq!(first.markdown, second.markdown);
        assert_eq!(first.md_version, second.md_version);
    }

    #[test]
    fn test_parsed_fingerprints_match_rendered() {
        let task = sample_task();
        let rendered = render_task(&task, &[], &RenderOptions::default()).unwrap();
        let parsed = parse_panel(&rendered.markdown).unwrap();
        let parsed_fps = crate::panel::fingerprint::fingerprint_sections(&parsed.raw_sections);
        assert_eq!(rendered.fingerprints, parsed_fps);
        assert_eq!(
            rendered.md_version,
            crate::panel::fingerprint::md_version(&parsed_fps)
        );
    }

    #[test]
    fn test_minted_ids_reported_and_stable_format() {
        let mut task = sample_task();
        task.plans[1].id = String::new();
        let rendered = render_task(&task, &[], &RenderOptions::default()).unwrap();
        assert_eq!(rendered.minted.len(), 1);
        let minted = &rendered.minted[0];
        assert!(minted.id.starts_with("plan-"));
        assert!(rendered
            .markdown
            .contains(&format!("<!-- plan:{} -->", minted.id)));
    }

    #[test]
    fn test_duplicate_ids_are_render_error() {
        let mut task = sample_task();
        task.plans[1].id = "plan-1".into();
        let err = render_task(&task, &[], &RenderOptions::default()).unwrap_err();
        assert_eq!(err.code(), "RENDER_ERROR");
    }

    #[test]
    fn test_front_matter_carries_md_version() {
        let task = sample_task();
        let opts = RenderOptions {
            front_matter: true,
            last_modified: Some("2026-07-01T10:00:00Z".parse().unwrap()),
        };
        let rendered = render_task(&task, &[], &opts).unwrap();
        assert!(rendered.markdown.starts_with("---\n"));
        assert!(rendered
            .markdown
            .contains(&format!("md_version: {}", rendered.md_version)));

        let parsed = parse_panel(&rendered.markdown).unwrap();
        assert_eq!(parsed.metadata.version.as_deref(), Some(rendered.md_version.as_str()));
        assert!(parsed.metadata.last_modified.is_some());
    }

    #[test]
    fn test_log_line_format() {
        let task = sample_task();
        let logs = vec![LogEntry {
            at: "2026-07-01T10:00:00Z".parse().unwrap(),
            level: LogLevel::Info,
            category: "task".into(),
            action: "init".into(),
            message: "created".into(),
            ai_notes: Some("first pass".into()),
        }];
        let rendered = render_task(&task, &logs, &RenderOptions::default()).unwrap();
        assert!(rendered
            .markdown
            .contains("[2026-07-01T10:00:00Z] INFO task/init: created"));
        assert!(rendered.markdown.contains("  AI Notes: first pass"));
    }

    #[test]
    fn test_anchor_ids_survive_second_round_trip() {
        let task = sample_task();
        let rendered = render_task(&task, &[], &RenderOptions::default()).unwrap();
        let parsed = parse_panel(&rendered.markdown).unwrap();
        // Every anchor appears exactly once.
        for id in ["plan-1", "plan-2", "step-1", "evr-1"] {
            let needle = format!(":{} -->", id);
            assert_eq!(
                rendered.markdown.matches(&needle).count(),
                1,
                "expected exactly one anchor for {}",
                id
            );
        }
        assert_eq!(parsed.evrs[0].id, "evr-1");
    }
}
