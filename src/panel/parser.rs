//! Tolerant panel parser
//!
//! Turns a human-edited Markdown panel into a [`ParsedPanel`]. The parser
//! never throws on recoverable issues: it applies deterministic tolerance
//! fixes (recorded, capped), collects parse issues with line context, and
//! keeps going. It fails only when the section skeleton is unrecoverable.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;

use super::anchors::{self, AnchorKind, AnchorScan};
use super::glyphs;
use super::models::{
    FixKind, PanelMetadata, ParseIssue, ParsedEvr, ParsedPanel, ParsedPlan, ParsedStep, Section,
    ToleranceFix,
};
use crate::error::{WaveError, WaveResult};
use crate::task::models::{ContextTag, EvrClass, EvrStatus, TagKind, VerifyExpect};

/// Default cap on recorded (and applied) tolerance fixes.
pub const MAX_TOLERANCE_FIXES: usize = 50;

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.*?)\s*$").unwrap());

/// Checkbox line grammar: optional ordinal path or bullet, then a
/// single-char glyph in brackets, then the text.
static CHECKBOX_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)(?:(\d+(?:\.\d+)*)\.?\s*|[-*]\s*)?\[(.)\]\s*(.*)$").unwrap()
});

static HINT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\s*)>\s?(.*)$").unwrap());

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)-\s*\[([a-z_]{2,})\]\s*(.*)$").unwrap());

static EVR_FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*-\s*\[(verify|expect|status|class|last_run|notes|proof)\]\s*(.*)$").unwrap()
});

static BULLET_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*]|\d+\.)\s+(.*)$").unwrap());

#[derive(Debug, Deserialize, Default)]
struct FrontMatter {
    md_version: Option<String>,
    last_modified: Option<String>,
}

/// Parser tuning knobs.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Cap on tolerance fixes; beyond it no further rewrites are applied.
    pub max_fixes: usize,
    /// Maximum checkbox depth; `None` auto-detects (1, or 2 when
    /// hierarchical ordinal paths are present).
    pub max_depth: Option<usize>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_fixes: MAX_TOLERANCE_FIXES,
            max_depth: None,
        }
    }
}

/// Parse a panel with default configuration.
pub fn parse_panel(text: &str) -> WaveResult<ParsedPanel> {
    parse_panel_with(text, &ParserConfig::default())
}

/// Parse a panel.
///
/// Returns `PARSE_ERROR` only when the skeleton is unrecoverable (no title
/// heading anywhere in the document).
pub fn parse_panel_with(text: &str, config: &ParserConfig) -> WaveResult<ParsedPanel> {
    let mut panel = ParsedPanel::default();

    let (front, body) = split_front_matter(text);
    if let Some(front) = front {
        match serde_yaml::from_str::<FrontMatter>(front) {
            Ok(fm) => {
                panel.metadata = PanelMetadata {
                    version: fm.md_version,
                    last_modified: fm.last_modified.as_deref().and_then(parse_timestamp),
                };
            }
            Err(e) => panel.parse_errors.push(ParseIssue {
                line: 0,
                context: front.lines().next().unwrap_or_default().to_string(),
                message: format!("unreadable front matter: {}", e),
                suggestion: Some("expected YAML with md_version / last_modified".into()),
            }),
        }
    }

    let mut fixes = FixRecorder::new(config.max_fixes);
    let mut lines: Vec<String> = body.lines().map(str::to_string).collect();

    let unit = detect_indent_unit(&lines);
    let max_depth = config
        .max_depth
        .unwrap_or_else(|| detect_max_depth(&lines));

    apply_blank_line_fixes(&mut lines, &mut fixes);
    apply_glyph_fixes(&mut lines, &mut fixes);
    apply_indent_fixes(&mut lines, unit, max_depth, &mut fixes);
    apply_heading_promotions(&mut lines, &mut fixes);

    let split = split_sections(&lines);
    let Some(title) = split.title else {
        return Err(WaveError::ParseError("panel has no title heading".into()));
    };
    panel.title = title;
    panel.raw_sections.title = split.title_raw;

    let mut synth_counter: u64 = 0;
    for (section, section_lines) in &split.sections {
        let raw = section_lines.join("\n").trim().to_string();
        match section {
            Section::Requirements => {
                panel.requirements = parse_list_items(section_lines);
                panel.raw_sections.requirements = raw;
            }
            Section::Issues => {
                panel.issues = parse_list_items(section_lines);
                panel.raw_sections.issues = raw;
            }
            Section::Hints => {
                panel.hints = parse_hint_items(section_lines);
                panel.raw_sections.hints = raw;
            }
            Section::Plans => {
                parse_plans_section(
                    section_lines,
                    unit,
                    &mut panel,
                    &mut fixes,
                    &mut synth_counter,
                );
            }
            Section::Evrs => {
                parse_evrs_section(section_lines, &mut panel, &mut fixes, &mut synth_counter);
            }
            Section::Logs => {
                panel.logs = section_lines
                    .iter()
                    .filter(|l| !l.trim().is_empty())
                    .map(|l| l.trim_end().to_string())
                    .collect();
                panel.raw_sections.logs = raw;
            }
        }
    }

    panel.fixes = fixes.into_fixes();
    Ok(panel)
}

// ---------------------------------------------------------------------------
// Tolerance pipeline
// ---------------------------------------------------------------------------

struct FixRecorder {
    fixes: Vec<ToleranceFix>,
    cap: usize,
}

impl FixRecorder {
    fn new(cap: usize) -> Self {
        Self {
            fixes: Vec::new(),
            cap,
        }
    }

    /// Record a fix if below the cap. Returns whether the rewrite may be
    /// applied; pathological input stops being rewritten once capped.
    fn try_record(&mut self, line: usize, kind: FixKind, detail: impl Into<String>) -> bool {
        if self.fixes.len() >= self.cap {
            return false;
        }
        self.fixes.push(ToleranceFix {
            line,
            kind,
            detail: detail.into(),
        });
        true
    }

    fn into_fixes(self) -> Vec<ToleranceFix> {
        self.fixes
    }
}

fn is_checkbox_line(line: &str) -> bool {
    CHECKBOX_LINE_RE.is_match(line)
}

fn leading_width(line: &str) -> usize {
    let mut width = 0;
    for c in line.chars() {
        match c {
            ' ' => width += 1,
            '\t' => width += 4,
            _ => break,
        }
    }
    width
}

fn is_top_level_checkbox(line: &str) -> bool {
    leading_width(line) == 0 && is_checkbox_line(line)
}

/// Step 1: blank line after headings and between consecutive top-level
/// plan lines.
fn apply_blank_line_fixes(lines: &mut Vec<String>, fixes: &mut FixRecorder) {
    let mut i = 0;
    while i + 1 < lines.len() {
        let needs_blank = (HEADING_RE.is_match(&lines[i]) && !lines[i + 1].trim().is_empty())
            || (is_top_level_checkbox(&lines[i]) && is_top_level_checkbox(&lines[i + 1]));
        if needs_blank
            && fixes.try_record(i, FixKind::InsertedBlankLine, lines[i].clone())
        {
            lines.insert(i + 1, String::new());
            i += 1;
        }
        i += 1;
    }
}

/// Step 2: map glyph variants onto the canonical set.
fn apply_glyph_fixes(lines: &mut [String], fixes: &mut FixRecorder) {
    for i in 0..lines.len() {
        let Some(caps) = CHECKBOX_LINE_RE.captures(&lines[i]) else {
            continue;
        };
        let glyph = caps[3].chars().next().unwrap_or(' ');
        let Some(canonical) = glyphs::normalize_glyph(glyph) else {
            continue;
        };
        if canonical != glyph
            && fixes.try_record(
                i,
                FixKind::NormalizedGlyph,
                format!("[{}] -> [{}]", glyph, canonical),
            )
        {
            let Some(glyph_span) = caps.get(3) else {
                continue;
            };
            let (start, end) = (glyph_span.start(), glyph_span.end());
            let mut rebuilt = String::with_capacity(lines[i].len());
            rebuilt.push_str(&lines[i][..start]);
            rebuilt.push(canonical);
            rebuilt.push_str(&lines[i][end..]);
            lines[i] = rebuilt;
        }
    }
}

/// Pick the dominant indent unit (2, 3, or 4) from the histogram of leading
/// widths on indented checkbox lines.
fn detect_indent_unit(lines: &[String]) -> usize {
    let widths: Vec<usize> = lines
        .iter()
        .filter(|l| is_checkbox_line(l))
        .map(|l| leading_width(l))
        .filter(|w| *w > 0)
        .collect();
    if widths.is_empty() {
        return 2;
    }
    let mut best = 2;
    let mut best_score = 0usize;
    for unit in [2usize, 3, 4] {
        let score = widths.iter().filter(|w| *w % unit == 0).count();
        if score > best_score {
            best = unit;
            best_score = score;
        }
    }
    best
}

/// Hierarchical nesting is detected when any ordinal path has three or more
/// components (`1.2.1`).
fn detect_max_depth(lines: &[String]) -> usize {
    let deep = lines.iter().any(|l| {
        CHECKBOX_LINE_RE
            .captures(l)
            .and_then(|c| c.get(2).map(|m| m.as_str().split('.').count()))
            .map(|d| d >= 3)
            .unwrap_or(false)
    });
    if deep {
        2
    } else {
        1
    }
}

/// Step 3: snap checkbox/hint/tag indents to the dominant unit; lines
/// deeper than `max_depth` become HTML comments rather than being dropped.
fn apply_indent_fixes(
    lines: &mut [String],
    unit: usize,
    max_depth: usize,
    fixes: &mut FixRecorder,
) {
    for i in 0..lines.len() {
        let is_checkbox = is_checkbox_line(&lines[i]);
        let is_indentable =
            is_checkbox || HINT_RE.is_match(&lines[i]) || TAG_RE.is_match(&lines[i]);
        if !is_indentable {
            continue;
        }
        let width = leading_width(&lines[i]);
        if width == 0 {
            continue;
        }
        let depth = (width + unit / 2) / unit;
        let snapped = depth * unit;
        let trimmed = lines[i].trim().to_string();

        if is_checkbox && depth > max_depth {
            if fixes.try_record(i, FixKind::DemotedToComment, trimmed.clone()) {
                lines[i] = format!("<!-- {} -->", trimmed);
            }
            continue;
        }

        if snapped != width
            && fixes.try_record(
                i,
                FixKind::NormalizedIndent,
                format!("{} -> {} spaces", width, snapped),
            )
        {
            lines[i] = format!("{}{}", " ".repeat(snapped), trimmed);
        }
    }
}

/// Step 4: promote bare section keywords to `##` headings.
fn apply_heading_promotions(lines: &mut [String], fixes: &mut FixRecorder) {
    for i in 0..lines.len() {
        let trimmed = lines[i].trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.len() > 40 {
            continue;
        }
        if Section::from_heading(trimmed).is_some()
            && fixes.try_record(i, FixKind::PromotedHeading, trimmed.to_string())
        {
            lines[i] = format!("## {}", trimmed);
        }
    }
}

// ---------------------------------------------------------------------------
// Section splitting
// ---------------------------------------------------------------------------

struct SplitSections {
    title: Option<String>,
    title_raw: String,
    sections: Vec<(Section, Vec<String>)>,
}

fn strip_title_prefix(text: &str) -> &str {
    let t = text.trim();
    for prefix in ["Task:", "task:", "任务:", "任务："] {
        if let Some(rest) = t.strip_prefix(prefix) {
            return rest.trim_start();
        }
    }
    t
}

fn split_sections(lines: &[String]) -> SplitSections {
    let mut split = SplitSections {
        title: None,
        title_raw: String::new(),
        sections: Vec::new(),
    };
    let mut current: Option<usize> = None;

    for line in lines {
        if let Some(caps) = HEADING_RE.captures(line) {
            let level = caps[1].len();
            let text = caps[2].to_string();
            if level == 1 {
                if split.title.is_none() {
                    split.title = Some(strip_title_prefix(&text).to_string());
                    split.title_raw = line.clone();
                }
                current = None;
                continue;
            }
            if level == 2 {
                if let Some(section) = Section::from_heading(&text) {
                    // Duplicate section headings merge into one body.
                    let idx = split
                        .sections
                        .iter()
                        .position(|(s, _)| *s == section)
                        .unwrap_or_else(|| {
                            split.sections.push((section, Vec::new()));
                            split.sections.len() - 1
                        });
                    current = Some(idx);
                    continue;
                }
            }
        }
        if let Some(idx) = current {
            split.sections[idx].1.push(line.clone());
        }
    }

    split
}

// ---------------------------------------------------------------------------
// Simple sections
// ---------------------------------------------------------------------------

fn parse_list_items(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter(|l| !l.trim().is_empty() && !l.trim().starts_with("<!--"))
        .map(|l| {
            BULLET_ITEM_RE
                .captures(l)
                .map(|c| c[1].trim().to_string())
                .unwrap_or_else(|| l.trim().to_string())
        })
        .collect()
}

fn parse_hint_items(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter(|l| !l.trim().is_empty() && !l.trim().starts_with("<!--"))
        .map(|l| {
            if let Some(caps) = HINT_RE.captures(l) {
                caps[2].trim().to_string()
            } else if let Some(caps) = BULLET_ITEM_RE.captures(l) {
                caps[1].trim().to_string()
            } else {
                l.trim().to_string()
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Plans & Steps
// ---------------------------------------------------------------------------

/// Resolve the anchor identifying the entity on `line`.
///
/// An anchor embedded in the line itself always wins; otherwise the
/// best-match rule applies, restricted to standalone anchors — an anchor
/// sitting on a *different* checkbox line belongs to that line's entity.
fn resolve_entity_anchor(
    scan: &AnchorScan,
    kind: AnchorKind,
    line: usize,
    checkbox_lines: &std::collections::HashSet<usize>,
) -> Option<String> {
    scan.anchors
        .iter()
        .filter(|a| a.kind == kind)
        .filter(|a| {
            a.line == line || (a.line.abs_diff(line) <= 2 && !checkbox_lines.contains(&a.line))
        })
        .min_by_key(|a| {
            let before_penalty = if a.line < line { 1 } else { 0 };
            (a.line.abs_diff(line), before_penalty)
        })
        .map(|a| a.id.clone())
}

fn checkbox_line_set(lines: &[String]) -> std::collections::HashSet<usize> {
    lines
        .iter()
        .enumerate()
        .filter(|(_, l)| is_checkbox_line(l))
        .map(|(i, _)| i)
        .collect()
}

/// Tolerance step 5 for one section: give every checkbox line an anchor,
/// minting from the ordinal path when present, else a synthesized id that
/// is also flagged as a parse issue.
fn ensure_anchors(
    lines: &mut [String],
    kind_for_line: impl Fn(&str) -> Option<AnchorKind>,
    fixes: &mut FixRecorder,
    issues: &mut Vec<ParseIssue>,
    synth_counter: &mut u64,
) {
    let borrowed: Vec<&str> = lines.iter().map(String::as_str).collect();
    let scan = anchors::scan(&borrowed);
    let checkbox_lines = checkbox_line_set(lines);
    let mut used: Vec<String> = scan.anchors.iter().map(|a| a.id.clone()).collect();

    let mut injections: Vec<(usize, AnchorKind, String)> = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if !is_checkbox_line(line) {
            continue;
        }
        let Some(kind) = kind_for_line(line) else {
            continue;
        };
        if resolve_entity_anchor(&scan, kind, i, &checkbox_lines).is_some() {
            continue;
        }
        let mut id = match anchors::ordinal_at(&scan, i) {
            Some(ordinal) => format!("{}-{}", kind.prefix(), ordinal.path),
            None => {
                let id = anchors::synthesize_id(kind, i, synth_counter);
                issues.push(ParseIssue {
                    line: i,
                    context: line.clone(),
                    message: "checkbox line has neither anchor nor ordinal path".into(),
                    suggestion: Some(format!("assigned synthetic id {}", id)),
                });
                id
            }
        };
        while used.contains(&id) {
            id.push('x');
        }
        used.push(id.clone());
        injections.push((i, kind, id));
    }

    // Ids are required for assembly, so injection itself is not subject to
    // the fix cap; only the recording is.
    for (i, kind, id) in injections {
        fixes.try_record(
            i,
            FixKind::InjectedAnchor,
            format!("{}:{}", kind.prefix(), id),
        );
        let line = lines[i].trim_end().to_string();
        lines[i] = format!("{} <!-- {}:{} -->", line, kind.prefix(), id);
    }
}

fn parse_plans_section(
    section_lines: &[String],
    unit: usize,
    panel: &mut ParsedPanel,
    fixes: &mut FixRecorder,
    synth_counter: &mut u64,
) {
    let mut lines: Vec<String> = section_lines.to_vec();
    ensure_anchors(
        &mut lines,
        |line| {
            let width = leading_width(line);
            if width == 0 {
                Some(AnchorKind::Plan)
            } else {
                Some(AnchorKind::Step)
            }
        },
        fixes,
        &mut panel.parse_errors,
        synth_counter,
    );

    let borrowed: Vec<&str> = lines.iter().map(String::as_str).collect();
    let scan = anchors::scan(&borrowed);
    let checkbox_lines = checkbox_line_set(&lines);
    panel.parse_errors.extend(scan.warnings.iter().cloned());

    let mut raw_blocks: Vec<(String, Vec<String>)> = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        if line.trim().starts_with("<!--") && !is_checkbox_line(line) {
            continue;
        }

        if let Some(caps) = CHECKBOX_LINE_RE.captures(line) {
            let depth = leading_width(line) / unit.max(1);
            let glyph = caps[3].chars().next().unwrap_or(' ');
            let Some(status) = glyphs::item_status_from_glyph(glyph) else {
                panel.parse_errors.push(ParseIssue {
                    line: i,
                    context: line.clone(),
                    message: format!("unrecognized checkbox glyph [{}]", glyph),
                    suggestion: Some("use one of [ ], [-], [x], [!]".into()),
                });
                continue;
            };
            let number_path = caps.get(2).map(|m| m.as_str().to_string());
            let text = anchors::strip_anchors(&caps[4]);

            if depth == 0 {
                let id = resolve_entity_anchor(&scan, AnchorKind::Plan, i, &checkbox_lines)
                    .unwrap_or_else(|| anchors::synthesize_id(AnchorKind::Plan, i, synth_counter));
                raw_blocks.push((id.clone(), vec![line.clone()]));
                panel.plans.push(ParsedPlan {
                    id,
                    text,
                    status,
                    hints: Vec::new(),
                    context_tags: Vec::new(),
                    steps: Vec::new(),
                    number_path,
                });
            } else {
                let Some(plan) = panel.plans.last_mut() else {
                    panel.parse_errors.push(ParseIssue {
                        line: i,
                        context: line.clone(),
                        message: "step appears before any plan".into(),
                        suggestion: Some("indent steps under a plan line".into()),
                    });
                    continue;
                };
                let id = resolve_entity_anchor(&scan, AnchorKind::Step, i, &checkbox_lines)
                    .unwrap_or_else(|| anchors::synthesize_id(AnchorKind::Step, i, synth_counter));
                if let Some(block) = raw_blocks.last_mut() {
                    block.1.push(line.clone());
                }
                plan.steps.push(ParsedStep {
                    id,
                    text,
                    status,
                    hints: Vec::new(),
                    context_tags: Vec::new(),
                    number_path,
                });
            }
            continue;
        }

        if let Some(caps) = HINT_RE.captures(line) {
            let depth = leading_width(line) / unit.max(1);
            let hint = caps[2].trim().to_string();
            if let Some(block) = raw_blocks.last_mut() {
                block.1.push(line.clone());
            }
            attach_hint(panel, i, depth, hint);
            continue;
        }

        if let Some(caps) = TAG_RE.captures(line) {
            if let Some(kind) = TagKind::from_label(&caps[2]) {
                let depth = leading_width(line) / unit.max(1);
                let tag = ContextTag {
                    kind,
                    value: caps[3].trim().to_string(),
                };
                if let Some(block) = raw_blocks.last_mut() {
                    block.1.push(line.clone());
                }
                attach_tag(panel, i, depth, tag);
                continue;
            }
        }

        panel.parse_errors.push(ParseIssue {
            line: i,
            context: line.clone(),
            message: "unrecognized line in Plans & Steps".into(),
            suggestion: Some("expected a checkbox item, `> hint`, or `- [tag] value`".into()),
        });
    }

    for (id, block) in raw_blocks {
        panel
            .raw_sections
            .plans
            .insert(id, block.join("\n"));
    }
}

/// Hints at depth ≤ 1 belong to the plan; deeper ones to the last step.
fn attach_hint(panel: &mut ParsedPanel, line: usize, depth: usize, hint: String) {
    let Some(plan) = panel.plans.last_mut() else {
        panel.parse_errors.push(ParseIssue {
            line,
            context: format!("> {}", hint),
            message: "hint appears before any plan".into(),
            suggestion: None,
        });
        return;
    };
    if depth <= 1 {
        plan.hints.push(hint);
    } else if let Some(step) = plan.steps.last_mut() {
        step.hints.push(hint);
    } else {
        plan.hints.push(hint);
    }
}

/// Tags attribute by the same indent rule as hints.
fn attach_tag(panel: &mut ParsedPanel, line: usize, depth: usize, tag: ContextTag) {
    let Some(plan) = panel.plans.last_mut() else {
        panel.parse_errors.push(ParseIssue {
            line,
            context: format!("- [{}] {}", tag.kind.as_str(), tag.value),
            message: "context tag appears before any plan".into(),
            suggestion: None,
        });
        return;
    };
    if depth <= 1 {
        plan.context_tags.push(tag);
    } else if let Some(step) = plan.steps.last_mut() {
        step.context_tags.push(tag);
    } else {
        plan.context_tags.push(tag);
    }
}

// ---------------------------------------------------------------------------
// Expected Visible Results
// ---------------------------------------------------------------------------

fn parse_evrs_section(
    section_lines: &[String],
    panel: &mut ParsedPanel,
    fixes: &mut FixRecorder,
    synth_counter: &mut u64,
) {
    let mut lines: Vec<String> = section_lines.to_vec();
    ensure_anchors(
        &mut lines,
        |_| Some(AnchorKind::Evr),
        fixes,
        &mut panel.parse_errors,
        synth_counter,
    );

    let borrowed: Vec<&str> = lines.iter().map(String::as_str).collect();
    let scan = anchors::scan(&borrowed);
    let checkbox_lines = checkbox_line_set(&lines);
    panel.parse_errors.extend(scan.warnings.iter().cloned());

    let mut raw_blocks: Vec<(String, Vec<String>)> = Vec::new();
    let mut verify_rows: Vec<String> = Vec::new();
    let mut expect_rows: Vec<String> = Vec::new();

    fn flush_rows(evr: &mut ParsedEvr, verify: &mut Vec<String>, expect: &mut Vec<String>) {
        if !verify.is_empty() {
            evr.verify = Some(rows_to_value(std::mem::take(verify)));
        }
        if !expect.is_empty() {
            evr.expect = Some(rows_to_value(std::mem::take(expect)));
        }
    }

    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        if let Some(caps) = EVR_FIELD_RE.captures(line) {
            let Some(evr) = panel.evrs.last_mut() else {
                panel.parse_errors.push(ParseIssue {
                    line: i,
                    context: line.clone(),
                    message: "EVR field row appears before any EVR".into(),
                    suggestion: None,
                });
                continue;
            };
            if let Some(block) = raw_blocks.last_mut() {
                block.1.push(line.clone());
            }
            let value = caps[2].trim().to_string();
            match &caps[1] {
                "verify" => verify_rows.push(value),
                "expect" => expect_rows.push(value),
                "status" => {
                    if let Some(status) = EvrStatus::from_label(&value) {
                        evr.status = status;
                    } else {
                        panel.parse_errors.push(ParseIssue {
                            line: i,
                            context: line.clone(),
                            message: format!("unknown EVR status `{}`", value),
                            suggestion: Some("one of pass, fail, skip, unknown".into()),
                        });
                    }
                }
                "class" => {
                    if let Some(class) = EvrClass::from_label(&value) {
                        evr.class = Some(class);
                    } else {
                        panel.parse_errors.push(ParseIssue {
                            line: i,
                            context: line.clone(),
                            message: format!("unknown EVR class `{}`", value),
                            suggestion: Some("one of runtime, static".into()),
                        });
                    }
                }
                "last_run" => match parse_timestamp(&value) {
                    Some(ts) => evr.last_run = Some(ts),
                    None => panel.parse_errors.push(ParseIssue {
                        line: i,
                        context: line.clone(),
                        message: "unreadable last_run timestamp".into(),
                        suggestion: Some("use ISO-8601".into()),
                    }),
                },
                "notes" => evr.notes = Some(value),
                "proof" => evr.proof = Some(value),
                _ => {}
            }
            continue;
        }

        if let Some(caps) = CHECKBOX_LINE_RE.captures(line) {
            if let Some(evr) = panel.evrs.last_mut() {
                flush_rows(evr, &mut verify_rows, &mut expect_rows);
            }
            let glyph = caps[3].chars().next().unwrap_or(' ');
            let Some(status) = glyphs::evr_status_from_glyph(glyph) else {
                panel.parse_errors.push(ParseIssue {
                    line: i,
                    context: line.clone(),
                    message: format!("unrecognized EVR glyph [{}]", glyph),
                    suggestion: Some("use one of [ ], [-], [x], [!]".into()),
                });
                continue;
            };
            let title = anchors::strip_anchors(&caps[4]);
            let id = resolve_entity_anchor(&scan, AnchorKind::Evr, i, &checkbox_lines)
                .unwrap_or_else(|| anchors::synthesize_id(AnchorKind::Evr, i, synth_counter));
            raw_blocks.push((id.clone(), vec![line.clone()]));
            panel.evrs.push(ParsedEvr {
                id,
                title,
                status,
                verify: None,
                expect: None,
                class: None,
                last_run: None,
                notes: None,
                proof: None,
            });
            continue;
        }

        if line.trim().starts_with("<!--") {
            continue;
        }

        panel.parse_errors.push(ParseIssue {
            line: i,
            context: line.clone(),
            message: "unrecognized line in Expected Visible Results".into(),
            suggestion: Some("expected `N. [g] Title` or `- [field] value`".into()),
        });
    }

    if let Some(evr) = panel.evrs.last_mut() {
        flush_rows(evr, &mut verify_rows, &mut expect_rows);
    }

    for (id, block) in raw_blocks {
        panel.raw_sections.evrs.insert(id, block.join("\n"));
    }
}

/// One row is a scalar; repeated rows accumulate into an ordered list.
fn rows_to_value(mut rows: Vec<String>) -> VerifyExpect {
    if rows.len() == 1 {
        VerifyExpect::Text(rows.remove(0))
    } else {
        VerifyExpect::Items(rows)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn split_front_matter(text: &str) -> (Option<&str>, &str) {
    let Some(rest) = text.strip_prefix("---\n") else {
        return (None, text);
    };
    if let Some(end) = rest.find("\n---\n") {
        return (Some(&rest[..end]), &rest[end + 5..]);
    }
    if let Some(stripped) = rest.strip_suffix("\n---") {
        return (Some(stripped), "");
    }
    (None, text)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim().trim_matches('"').trim_matches('\'');
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}
