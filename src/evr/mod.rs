//! EVR validation and classification
//!
//! An Expected Visible Result is *ready* when its status is `pass`, or
//! `skip` with a non-empty reason on the most recent run. Classification
//! and summaries feed reads and completion responses; the admission gates
//! live in [`gate`].

pub mod gate;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::UnreadyReason;
use crate::task::models::{Evr, EvrStatus, Task};

pub use gate::{check_plan_gate, check_task_gate};

/// Classification of every EVR on a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvrSummary {
    pub total: usize,
    pub passed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
    pub unknown: Vec<String>,
    /// EVRs no plan references. Reported, not blocking.
    pub unreferenced: Vec<String>,
}

/// Classify all EVRs on the task.
pub fn summarize(task: &Task) -> EvrSummary {
    let mut summary = EvrSummary {
        total: task.evrs.len(),
        ..Default::default()
    };
    for evr in &task.evrs {
        match evr.status {
            EvrStatus::Pass => summary.passed.push(evr.id.clone()),
            EvrStatus::Skip => summary.skipped.push(evr.id.clone()),
            EvrStatus::Fail => summary.failed.push(evr.id.clone()),
            EvrStatus::Unknown => summary.unknown.push(evr.id.clone()),
        }
        if evr.referenced_by.is_empty() {
            summary.unreferenced.push(evr.id.clone());
        }
    }
    summary
}

/// Readiness of one EVR, ignoring runtime staleness (which only the task
/// gate applies — see [`gate`]).
pub fn readiness(evr: &Evr) -> Result<(), UnreadyReason> {
    match evr.status {
        EvrStatus::Pass => Ok(()),
        EvrStatus::Fail => Err(UnreadyReason::Failed),
        EvrStatus::Unknown => Err(UnreadyReason::StatusUnknown),
        EvrStatus::Skip => {
            let has_reason = evr
                .latest_run()
                .and_then(|run| run.notes.as_deref())
                .map(|notes| !notes.trim().is_empty())
                .unwrap_or(false);
            if has_reason {
                Ok(())
            } else {
                Err(UnreadyReason::NeedReasonForSkip)
            }
        }
    }
}

/// Per-EVR detail rows for read responses.
pub fn details(task: &Task) -> Vec<Value> {
    task.evrs
        .iter()
        .map(|evr| {
            let ready = gate::task_gate_readiness(task, evr);
            json!({
                "id": evr.id,
                "title": evr.title,
                "status": evr.status.as_str(),
                "class": evr.class.as_str(),
                "ready": ready.is_ok(),
                "reason": ready.err(),
                "referenced_by": evr.referenced_by,
                "runs": evr.runs.len(),
                "last_run": evr.last_run,
            })
        })
        .collect()
}
