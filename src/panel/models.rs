//! Parsed-panel models
//!
//! The parser's output: a structured view of the Markdown panel plus the
//! tolerance fixes it applied and the recoverable issues it noticed. The
//! panel is authoritative for content; statuses read here are only ever
//! *reported* against the task, never written back.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::models::{ContextTag, EvrClass, EvrStatus, ItemStatus, VerifyExpect};

/// Panel sections recognized by the parser. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Requirements,
    Issues,
    Hints,
    Plans,
    Evrs,
    Logs,
}

impl Section {
    /// Canonical English heading.
    pub fn heading(self) -> &'static str {
        match self {
            Section::Requirements => "Requirements",
            Section::Issues => "Issues",
            Section::Hints => "Task Hints",
            Section::Plans => "Plans & Steps",
            Section::Evrs => "Expected Visible Results",
            Section::Logs => "Logs",
        }
    }

    /// Match a heading against the closed bilingual vocabulary,
    /// case-insensitively.
    pub fn from_heading(text: &str) -> Option<Self> {
        let t = text.trim().to_lowercase();
        match t.as_str() {
            "requirements" | "需求" => Some(Section::Requirements),
            "issues" | "问题" => Some(Section::Issues),
            "task hints" | "任务提示" => Some(Section::Hints),
            "plans & steps" | "plans and steps" | "计划与步骤" => Some(Section::Plans),
            "expected visible results" | "预期可见结果" => Some(Section::Evrs),
            "logs" | "日志" => Some(Section::Logs),
            _ => None,
        }
    }
}

/// Front-matter metadata carried by the panel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PanelMetadata {
    /// `md_version` from the front matter, when present.
    pub version: Option<String>,
    /// `last_modified` from the front matter (or the file mtime, when the
    /// store supplies it as a fallback).
    pub last_modified: Option<DateTime<Utc>>,
}

/// A deterministic rewrite the parser applied to recover from a common
/// formatting mistake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToleranceFix {
    /// 0-based line index in the pre-fix text.
    pub line: usize,
    pub kind: FixKind,
    pub detail: String,
}

/// Kinds of tolerance fixes, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixKind {
    InsertedBlankLine,
    NormalizedGlyph,
    NormalizedIndent,
    DemotedToComment,
    PromotedHeading,
    InjectedAnchor,
}

/// A recoverable parse issue, surfaced as metadata on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseIssue {
    /// 0-based line index.
    pub line: usize,
    /// The offending line content.
    pub context: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// A step parsed from the panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedStep {
    pub id: String,
    pub text: String,
    pub status: ItemStatus,
    #[serde(default)]
    pub hints: Vec<String>,
    #[serde(default)]
    pub context_tags: Vec<ContextTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_path: Option<String>,
}

/// A plan parsed from the panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedPlan {
    pub id: String,
    pub text: String,
    pub status: ItemStatus,
    #[serde(default)]
    pub hints: Vec<String>,
    #[serde(default)]
    pub context_tags: Vec<ContextTag>,
    #[serde(default)]
    pub steps: Vec<ParsedStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_path: Option<String>,
}

/// An EVR parsed from the panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedEvr {
    pub id: String,
    pub title: String,
    pub status: EvrStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<VerifyExpect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect: Option<VerifyExpect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<EvrClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<String>,
}

/// Raw source text per section, used for fingerprinting.
///
/// Plans and EVRs are keyed by entity id so a change to one entity only
/// invalidates that entity's fingerprint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSections {
    pub title: String,
    pub requirements: String,
    pub issues: String,
    pub hints: String,
    pub logs: String,
    pub plans: BTreeMap<String, String>,
    pub evrs: BTreeMap<String, String>,
}

/// The parser's structured output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedPanel {
    pub title: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub hints: Vec<String>,
    #[serde(default)]
    pub plans: Vec<ParsedPlan>,
    #[serde(default)]
    pub evrs: Vec<ParsedEvr>,
    /// Raw log lines. Logs are append-only on the task side and are never
    /// synced back from the panel.
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub metadata: PanelMetadata,
    #[serde(default)]
    pub fixes: Vec<ToleranceFix>,
    #[serde(default)]
    pub parse_errors: Vec<ParseIssue>,
    #[serde(default)]
    pub raw_sections: RawSections,
}

impl ParsedPanel {
    pub fn plan_by_id(&self, id: &str) -> Option<&ParsedPlan> {
        self.plans.iter().find(|p| p.id == id)
    }

    pub fn evr_by_id(&self, id: &str) -> Option<&ParsedEvr> {
        self.evrs.iter().find(|e| e.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_vocabulary_is_closed() {
        assert_eq!(Section::from_heading("Requirements"), Some(Section::Requirements));
        assert_eq!(Section::from_heading("REQUIREMENTS"), Some(Section::Requirements));
        assert_eq!(Section::from_heading("plans & steps"), Some(Section::Plans));
        assert_eq!(Section::from_heading("计划与步骤"), Some(Section::Plans));
        assert_eq!(Section::from_heading("预期可见结果"), Some(Section::Evrs));
        assert_eq!(Section::from_heading("Random Heading"), None);
    }

    #[test]
    fn test_section_headings_round_trip() {
        for section in [
            Section::Requirements,
            Section::Issues,
            Section::Hints,
            Section::Plans,
            Section::Evrs,
            Section::Logs,
        ] {
            assert_eq!(Section::from_heading(section.heading()), Some(section));
        }
    }
}
