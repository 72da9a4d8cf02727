//! Conflict resolution strategies
//!
//! A resolver is a pure function of conflict record → resolution; no I/O.

use serde::{Deserialize, Serialize};

use super::models::{Conflict, Resolution};

/// Available strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Timestamps decide; the task wins ties and missing data.
    TsOnly,
    /// ETag-aware resolution. Panels already carry `md_version` in their
    /// front matter, but until comparison is wired through this delegates
    /// to `ts_only`.
    EtagFirstThenTs,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::TsOnly => "ts_only",
            Strategy::EtagFirstThenTs => "etag_first_then_ts",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "ts_only" => Some(Strategy::TsOnly),
            "etag_first_then_ts" => Some(Strategy::EtagFirstThenTs),
            _ => None,
        }
    }
}

/// Resolve one conflict.
///
/// `skew_ms` is how far the panel's timestamp must exceed the task's
/// before the panel wins (default 0).
pub fn resolve(strategy: Strategy, conflict: &Conflict, skew_ms: i64) -> Resolution {
    match strategy {
        Strategy::TsOnly => ts_only(conflict, skew_ms),
        Strategy::EtagFirstThenTs => ts_only(conflict, skew_ms),
    }
}

fn ts_only(conflict: &Conflict, skew_ms: i64) -> Resolution {
    match (conflict.panel_ts, conflict.task_ts) {
        (Some(panel), Some(task)) => {
            let lead = panel.signed_duration_since(task).num_milliseconds();
            if lead > skew_ms {
                Resolution::Theirs
            } else {
                Resolution::Ours
            }
        }
        // Either side missing its timestamp: the task wins.
        _ => Resolution::Ours,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::models::ConflictReason;
    use chrono::{Duration, Utc};

    fn conflict(panel_lead_ms: Option<i64>) -> Conflict {
        let task_ts = Utc::now();
        Conflict {
            plan_id: "plan-1".into(),
            field: "text".into(),
            ours: "A".into(),
            theirs: "B".into(),
            task_ts: Some(task_ts),
            panel_ts: panel_lead_ms.map(|ms| task_ts + Duration::milliseconds(ms)),
            reason: ConflictReason::ConcurrentUpdate,
        }
    }

    #[test]
    fn test_panel_newer_wins() {
        let resolution = resolve(Strategy::TsOnly, &conflict(Some(10_000)), 0);
        assert_eq!(resolution, Resolution::Theirs);
    }

    #[test]
    fn test_task_newer_wins() {
        let resolution = resolve(Strategy::TsOnly, &conflict(Some(-10_000)), 0);
        assert_eq!(resolution, Resolution::Ours);
    }

    #[test]
    fn test_tie_goes_to_task() {
        let resolution = resolve(Strategy::TsOnly, &conflict(Some(0)), 0);
        assert_eq!(resolution, Resolution::Ours);
    }

    #[test]
    fn test_missing_timestamp_goes_to_task() {
        let resolution = resolve(Strategy::TsOnly, &conflict(None), 0);
        assert_eq!(resolution, Resolution::Ours);
    }

    #[test]
    fn test_skew_raises_the_bar() {
        let resolution = resolve(Strategy::TsOnly, &conflict(Some(400)), 500);
        assert_eq!(resolution, Resolution::Ours);
        let resolution = resolve(Strategy::TsOnly, &conflict(Some(600)), 500);
        assert_eq!(resolution, Resolution::Theirs);
    }

    #[test]
    fn test_etag_strategy_currently_delegates() {
        let c = conflict(Some(10_000));
        assert_eq!(
            resolve(Strategy::EtagFirstThenTs, &c, 0),
            resolve(Strategy::TsOnly, &c, 0)
        );
    }

    #[test]
    fn test_strategy_labels() {
        assert_eq!(Strategy::from_label("ts_only"), Some(Strategy::TsOnly));
        assert_eq!(
            Strategy::from_label("etag_first_then_ts"),
            Some(Strategy::EtagFirstThenTs)
        );
        assert_eq!(Strategy::from_label("nope"), None);
    }
}
