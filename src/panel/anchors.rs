//! Anchor and ordinal-path resolution
//!
//! Plans, steps, and EVRs carry HTML-comment anchors (`<!-- plan:ID -->`)
//! giving them a rename-resistant identity. When a line has no anchor, the
//! ordinal path preceding its checkbox (`1.2.`) is the fallback identity;
//! when neither exists an id is synthesized and flagged.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::models::ParseIssue;

static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*(plan|step|evr):([A-Za-z0-9._-]+)\s*-->").unwrap()
});

static ORDINAL_CHECKBOX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+(?:\.\d+)*)\.?\s*\[").unwrap()
});

/// Entity kinds an anchor can identify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorKind {
    Plan,
    Step,
    Evr,
}

impl AnchorKind {
    pub fn prefix(self) -> &'static str {
        match self {
            AnchorKind::Plan => "plan",
            AnchorKind::Step => "step",
            AnchorKind::Evr => "evr",
        }
    }

    fn from_label(s: &str) -> Option<Self> {
        match s {
            "plan" => Some(AnchorKind::Plan),
            "step" => Some(AnchorKind::Step),
            "evr" => Some(AnchorKind::Evr),
            _ => None,
        }
    }
}

/// An HTML-comment anchor found in a section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub kind: AnchorKind,
    pub id: String,
    /// 0-based line index within the scanned section.
    pub line: usize,
}

/// An ordinal path (`1`, `1.2`, `1.2.1`) found before a checkbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrdinalRef {
    pub path: String,
    /// Number of components: 1 = plan level, >1 = step level.
    pub depth: usize,
    pub line: usize,
}

impl OrdinalRef {
    pub fn is_plan_level(&self) -> bool {
        self.depth == 1
    }
}

/// Everything the resolver found in one section.
#[derive(Debug, Clone, Default)]
pub struct AnchorScan {
    pub anchors: Vec<Anchor>,
    pub ordinals: Vec<OrdinalRef>,
    pub warnings: Vec<ParseIssue>,
}

/// Scan a section's lines for anchors and ordinal paths.
///
/// Duplicate anchor ids are a parse warning; the first occurrence wins and
/// later ones receive a synthetic suffix so every anchor stays unique.
pub fn scan(lines: &[&str]) -> AnchorScan {
    let mut scan = AnchorScan::default();
    let mut seen: HashSet<String> = HashSet::new();

    for (line_no, line) in lines.iter().enumerate() {
        for caps in ANCHOR_RE.captures_iter(line) {
            let kind = match AnchorKind::from_label(&caps[1]) {
                Some(k) => k,
                None => continue,
            };
            let mut id = caps[2].to_string();
            let key = format!("{}:{}", kind.prefix(), id);
            if seen.contains(&key) {
                let mut n = 2;
                let mut candidate = format!("{}-dup{}", id, n);
                while seen.contains(&format!("{}:{}", kind.prefix(), candidate)) {
                    n += 1;
                    candidate = format!("{}-dup{}", id, n);
                }
                scan.warnings.push(ParseIssue {
                    line: line_no,
                    context: line.to_string(),
                    message: format!("duplicate anchor {}:{}", kind.prefix(), id),
                    suggestion: Some(format!("renamed to {}:{}", kind.prefix(), candidate)),
                });
                id = candidate;
            }
            seen.insert(format!("{}:{}", kind.prefix(), id));
            scan.anchors.push(Anchor {
                kind,
                id,
                line: line_no,
            });
        }

        if let Some(caps) = ORDINAL_CHECKBOX_RE.captures(line) {
            let path = caps[1].to_string();
            let depth = path.split('.').count();
            scan.ordinals.push(OrdinalRef {
                path,
                depth,
                line: line_no,
            });
        }
    }

    scan
}

/// Best-match rule: the nearest anchor of `kind` within ±2 lines of `line`;
/// ties prefer the anchor *after* the line (anchors are conventionally
/// emitted just after their subject).
pub fn best_match<'a>(scan: &'a AnchorScan, kind: AnchorKind, line: usize) -> Option<&'a Anchor> {
    scan.anchors
        .iter()
        .filter(|a| a.kind == kind)
        .filter(|a| a.line.abs_diff(line) <= 2)
        .min_by_key(|a| {
            let distance = a.line.abs_diff(line);
            // Prefer anchors at or after the subject line on equal distance.
            let before_penalty = if a.line < line { 1 } else { 0 };
            (distance, before_penalty)
        })
}

/// The ordinal path on `line` itself, if any.
pub fn ordinal_at(scan: &AnchorScan, line: usize) -> Option<&OrdinalRef> {
    scan.ordinals.iter().find(|o| o.line == line)
}

/// Synthesize an id for a line with neither anchor nor ordinal path.
pub fn synthesize_id(kind: AnchorKind, line: usize, counter: &mut u64) -> String {
    *counter += 1;
    format!("{}-line{}-{}", kind.prefix(), line, counter)
}

/// Remove anchor comments from a text fragment.
pub fn strip_anchors(text: &str) -> String {
    ANCHOR_RE.replace_all(text, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_finds_anchors_and_ordinals() {
        let lines = vec![
            "1. [ ] First plan <!-- plan:plan-a -->",
            "  1.1. [x] A step <!-- step:step-a1 -->",
            "2. [ ] Second plan",
        ];
        let scan = scan(&lines);
        assert_eq!(scan.anchors.len(), 2);
        assert_eq!(scan.anchors[0].kind, AnchorKind::Plan);
        assert_eq!(scan.anchors[0].id, "plan-a");
        assert_eq!(scan.ordinals.len(), 3);
        assert!(scan.ordinals[0].is_plan_level());
        assert_eq!(scan.ordinals[1].depth, 2);
        assert!(scan.warnings.is_empty());
    }

    #[test]
    fn test_duplicate_anchor_first_wins() {
        let lines = vec![
            "1. [ ] One <!-- plan:same -->",
            "2. [ ] Two <!-- plan:same -->",
        ];
        let scan = scan(&lines);
        assert_eq!(scan.anchors[0].id, "same");
        assert_eq!(scan.anchors[1].id, "same-dup2");
        assert_eq!(scan.warnings.len(), 1);
        assert!(scan.warnings[0].message.contains("duplicate anchor"));
    }

    #[test]
    fn test_best_match_prefers_following_anchor() {
        let lines = vec![
            "<!-- plan:before -->",
            "1. [ ] Subject line",
            "<!-- plan:after -->",
        ];
        let scan = scan(&lines);
        let found = best_match(&scan, AnchorKind::Plan, 1).unwrap();
        assert_eq!(found.id, "after");
    }

    #[test]
    fn test_best_match_respects_window() {
        let lines = vec![
            "<!-- plan:far -->",
            "",
            "",
            "",
            "1. [ ] Subject line",
        ];
        let scan = scan(&lines);
        assert!(best_match(&scan, AnchorKind::Plan, 4).is_none());
    }

    #[test]
    fn test_best_match_filters_kind() {
        let lines = vec!["1. [ ] Subject <!-- step:nearby -->"];
        let scan = scan(&lines);
        assert!(best_match(&scan, AnchorKind::Plan, 0).is_none());
        assert!(best_match(&scan, AnchorKind::Step, 0).is_some());
    }

    #[test]
    fn test_synthesize_id_is_flagged_format() {
        let mut counter = 0;
        let id = synthesize_id(AnchorKind::Evr, 12, &mut counter);
        assert_eq!(id, "evr-line12-1");
        let id2 = synthesize_id(AnchorKind::Evr, 12, &mut counter);
        assert_eq!(id2, "evr-line12-2");
    }
}
