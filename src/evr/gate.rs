//! Plan and task admission gates
//!
//! The plan gate blocks a plan's transition to `completed` while any bound
//! EVR is not ready. The task gate blocks task completion while any EVR on
//! the task is not ready, and additionally demands *fresh* evidence from
//! runtime-class EVRs.
//!
//! Staleness window for runtime EVRs: the most recent `pass` run must be
//! at-or-after `completed_at` of the latest completed plan referencing the
//! EVR. A pass produced before that plan finished does not count as a
//! second look and gates as `status_unknown`.

use crate::error::{EvrRequirement, UnreadyReason};
use crate::task::models::{Evr, EvrClass, EvrStatus, Plan, Task};

use super::readiness;

/// Check whether `plan` may transition to `completed`.
///
/// Returns the ids of pending EVRs on violation. Dangling binding ids
/// (bound but absent from the task) are pending by definition.
pub fn check_plan_gate(task: &Task, plan: &Plan) -> Result<(), Vec<String>> {
    let mut pending = Vec::new();
    for evr_id in &plan.evr_bindings {
        match task.evr_by_id(evr_id) {
            Some(evr) => {
                if readiness(evr).is_err() {
                    pending.push(evr_id.clone());
                }
            }
            None => pending.push(evr_id.clone()),
        }
    }
    if pending.is_empty() {
        Ok(())
    } else {
        Err(pending)
    }
}

/// Readiness of one EVR under task-gate rules (adds the runtime staleness
/// window on top of [`readiness`]).
pub fn task_gate_readiness(task: &Task, evr: &Evr) -> Result<(), UnreadyReason> {
    readiness(evr)?;
    if evr.status == EvrStatus::Pass && evr.class == EvrClass::Runtime && is_stale(task, evr) {
        return Err(UnreadyReason::StatusUnknown);
    }
    Ok(())
}

/// Check whether the task may transition to `completed`.
pub fn check_task_gate(task: &Task) -> Result<(), Vec<EvrRequirement>> {
    let mut required = Vec::new();
    for evr in &task.evrs {
        if let Err(reason) = task_gate_readiness(task, evr) {
            required.push(EvrRequirement {
                evr_id: evr.id.clone(),
                reason,
            });
        }
    }
    if required.is_empty() {
        Ok(())
    } else {
        Err(required)
    }
}

/// A runtime EVR is stale when its most recent pass predates the latest
/// completion among the plans referencing it.
fn is_stale(task: &Task, evr: &Evr) -> bool {
    let latest_pass = evr
        .runs
        .iter()
        .rev()
        .find(|run| run.status == EvrStatus::Pass)
        .map(|run| run.at);
    let Some(latest_pass) = latest_pass else {
        return true;
    };
    let latest_plan_completion = evr
        .referenced_by
        .iter()
        .filter_map(|plan_id| task.plan_by_id(plan_id))
        .filter_map(|plan| plan.completed_at)
        .max();
    match latest_plan_completion {
        Some(completed_at) => latest_pass < completed_at,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::models::{Actor, EvrRun, ItemStatus, VerifyExpect};
    use chrono::{Duration, Utc};

    fn task_with_bound_evr() -> Task {
        let mut task = Task::new("Gate".into(), "g".into());
        let mut plan = Plan::new("plan-a".into(), "do it".into());
        plan.evr_bindings = vec!["evr-1".into()];
        task.plans.push(plan);
        let mut evr = Evr::new(
            "evr-1".into(),
            "works".into(),
            VerifyExpect::default(),
            VerifyExpect::default(),
        );
        evr.referenced_by = vec!["plan-a".into()];
        task.evrs.push(evr);
        task
    }

    fn pass_run(at: chrono::DateTime<Utc>) -> EvrRun {
        EvrRun {
            at,
            actor: Actor::Ai,
            status: EvrStatus::Pass,
            notes: None,
            proof: None,
        }
    }

    #[test]
    fn test_plan_gate_blocks_unknown_evr() {
        let task = task_with_bound_evr();
        let plan = task.plan_by_id("plan-a").unwrap();
        let pending = check_plan_gate(&task, plan).unwrap_err();
        assert_eq!(pending, vec!["evr-1".to_string()]);
    }

    #[test]
    fn test_plan_gate_passes_after_pass_run() {
        let mut task = task_with_bound_evr();
        task.evr_by_id_mut("evr-1")
            .unwrap()
            .record_run(pass_run(Utc::now()));
        let plan = task.plan_by_id("plan-a").unwrap();
        assert!(check_plan_gate(&task, plan).is_ok());
    }

    #[test]
    fn test_plan_gate_blocks_dangling_binding() {
        let mut task = task_with_bound_evr();
        task.evrs.clear();
        let plan = task.plan_by_id("plan-a").unwrap();
        assert_eq!(
            check_plan_gate(&task, plan).unwrap_err(),
            vec!["evr-1".to_string()]
        );
    }

    #[test]
    fn test_task_gate_blocks_skip_without_reason() {
        let mut task = task_with_bound_evr();
        task.evr_by_id_mut("evr-1").unwrap().record_run(EvrRun {
            at: Utc::now(),
            actor: Actor::User,
            status: EvrStatus::Skip,
            notes: None,
            proof: None,
        });
        let required = check_task_gate(&task).unwrap_err();
        assert_eq!(required.len(), 1);
        assert_eq!(required[0].evr_id, "evr-1");
        assert_eq!(required[0].reason, UnreadyReason::NeedReasonForSkip);
    }

    #[test]
    fn test_runtime_pass_before_plan_completion_is_stale() {
        let mut task = task_with_bound_evr();
        let completed_at = Utc::now();
        task.evr_by_id_mut("evr-1")
            .unwrap()
            .record_run(pass_run(completed_at - Duration::hours(1)));
        {
            let plan = task.plan_by_id_mut("plan-a").unwrap();
            plan.status = ItemStatus::Completed;
            plan.completed_at = Some(completed_at);
        }

        let required = check_task_gate(&task).unwrap_err();
        assert_eq!(required[0].reason, UnreadyReason::StatusUnknown);
    }

    #[test]
    fn test_runtime_second_look_satisfies_task_gate() {
        let mut task = task_with_bound_evr();
        let completed_at = Utc::now();
        {
            let plan = task.plan_by_id_mut("plan-a").unwrap();
            plan.status = ItemStatus::Completed;
            plan.completed_at = Some(completed_at);
        }
        task.evr_by_id_mut("evr-1")
            .unwrap()
            .record_run(pass_run(completed_at + Duration::minutes(1)));

        assert!(check_task_gate(&task).is_ok());
    }

    #[test]
    fn test_static_pass_is_enough() {
        let mut task = task_with_bound_evr();
        let completed_at = Utc::now();
        {
            let evr = task.evr_by_id_mut("evr-1").unwrap();
            evr.class = EvrClass::Static;
            evr.record_run(pass_run(completed_at - Duration::hours(2)));
        }
        {
            let plan = task.plan_by_id_mut("plan-a").unwrap();
            plan.status = ItemStatus::Completed;
            plan.completed_at = Some(completed_at);
        }
        assert!(check_task_gate(&task).is_ok());
    }
}
