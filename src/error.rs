//! Error types crossing the tool boundary
//!
//! Every failure a tool call can surface maps to one code from a closed set.
//! Handlers serialize these into `{success: false, error_code, message,
//! recovery?}` bodies; nothing else is allowed to cross the boundary.

use serde_json::{json, Value};
use thiserror::Error;

/// Errors surfaced by tool calls and the subsystems behind them.
#[derive(Debug, Error)]
pub enum WaveError {
    /// A task tool was called before `connect_project`.
    #[error("no project bound to this session")]
    NoProjectBound,

    /// A task tool (other than init) was called before a task exists.
    #[error("no active task for this project")]
    NoActiveTask,

    /// The provided root path is missing, not a directory, or unreadable.
    #[error("invalid project root: {0}")]
    InvalidRoot(String),

    /// Project resolution produced zero candidates.
    #[error("not found: {0}")]
    NotFound(String),

    /// Project resolution was ambiguous.
    #[error("multiple projects match")]
    MultipleCandidates { candidates: Vec<String> },

    /// Permission denied on a required path.
    #[error("missing permissions: {0}")]
    MissingPermissions(String),

    /// Task gate blocked completion; the required EVRs are attached.
    #[error("task completion blocked: {} EVR(s) not ready", required.len())]
    EvrNotReady {
        required: Vec<EvrRequirement>,
        summary: Value,
    },

    /// An EVR run payload was structurally invalid.
    #[error("invalid EVR run: {0}")]
    EvrValidationFailed(String),

    /// The sync engine could not reach a decision.
    #[error("sync conflict: {0}")]
    SyncConflict(String),

    /// The panel was unrecoverable.
    #[error("panel parse failed: {0}")]
    ParseError(String),

    /// A renderer invariant was violated.
    #[error("panel render failed: {0}")]
    RenderError(String),

    /// A status transition outside the admitted set was requested.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// A plan's bound EVRs are not ready for completion.
    #[error("plan {plan_id} blocked by pending EVRs")]
    PlanGateBlocked {
        plan_id: String,
        evr_for_plan: Vec<String>,
    },

    /// Lock acquisition failed or timed out; the caller may retry.
    #[error("lock unavailable: {0}")]
    LockTimeout(String),

    /// The mutation's expected version no longer matches the stored task.
    #[error("version conflict: expected {expected}, found {found}")]
    VersionConflict { expected: u64, found: u64 },

    /// Underlying I/O failure while touching the task directory.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Serialization failure in the persistence layer.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// One blocking EVR with its reason code, attached to `EVR_NOT_READY`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EvrRequirement {
    pub evr_id: String,
    pub reason: UnreadyReason,
}

/// Why an EVR does not satisfy a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnreadyReason {
    StatusUnknown,
    Failed,
    NeedReasonForSkip,
}

impl WaveError {
    /// Stable error code string for the tool boundary.
    pub fn code(&self) -> &'static str {
        match self {
            WaveError::NoProjectBound => "NO_PROJECT_BOUND",
            WaveError::NoActiveTask => "NO_ACTIVE_TASK",
            WaveError::InvalidRoot(_) => "INVALID_ROOT",
            WaveError::NotFound(_) => "NOT_FOUND",
            WaveError::MultipleCandidates { .. } => "MULTIPLE_CANDIDATES",
            WaveError::MissingPermissions(_) => "MISSING_PERMISSIONS",
            WaveError::EvrNotReady { .. } => "EVR_NOT_READY",
            WaveError::EvrValidationFailed(_) => "EVR_VALIDATION_FAILED",
            WaveError::SyncConflict(_) => "SYNC_CONFLICT",
            WaveError::ParseError(_) => "PARSE_ERROR",
            WaveError::RenderError(_) => "RENDER_ERROR",
            WaveError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            WaveError::PlanGateBlocked { .. } => "PLAN_GATE_BLOCKED",
            WaveError::LockTimeout(_) => "LOCK_TIMEOUT",
            WaveError::VersionConflict { .. } => "VERSION_CONFLICT",
            WaveError::Storage(_) => "MISSING_PERMISSIONS",
            WaveError::Encoding(_) => "PARSE_ERROR",
        }
    }

    /// Recovery payload, when the caller can drive the fix without
    /// re-reading the whole task.
    pub fn recovery(&self) -> Option<Value> {
        match self {
            WaveError::NoProjectBound => Some(json!({"next_action": "connect_project"})),
            WaveError::NoActiveTask => Some(json!({"next_action": "current_task_init"})),
            WaveError::MultipleCandidates { candidates } => {
                Some(json!({"candidates": candidates}))
            }
            WaveError::EvrNotReady { required, summary } => Some(json!({
                "evr_required_final": required,
                "evr_summary": summary,
            })),
            WaveError::PlanGateBlocked { evr_for_plan, .. } => {
                Some(json!({"evr_for_plan": evr_for_plan}))
            }
            WaveError::LockTimeout(_) => Some(json!({"retry": true})),
            WaveError::VersionConflict { .. } => {
                Some(json!({"retry": true, "next_action": "current_task_read"}))
            }
            _ => None,
        }
    }

    /// Serialize into the tool-call body for a failed operation.
    pub fn to_body(&self) -> Value {
        let mut body = json!({
            "success": false,
            "error_code": self.code(),
            "message": self.to_string(),
        });
        if let Some(recovery) = self.recovery() {
            body["recovery"] = recovery;
        }
        body
    }
}

pub type WaveResult<T> = Result<T, WaveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(WaveError::NoProjectBound.code(), "NO_PROJECT_BOUND");
        assert_eq!(WaveError::NoActiveTask.code(), "NO_ACTIVE_TASK");
        assert_eq!(
            WaveError::PlanGateBlocked {
                plan_id: "plan-1".into(),
                evr_for_plan: vec![]
            }
            .code(),
            "PLAN_GATE_BLOCKED"
        );
    }

    #[test]
    fn test_handshake_recovery_payloads() {
        let body = WaveError::NoProjectBound.to_body();
        assert_eq!(body["success"], false);
        assert_eq!(body["recovery"]["next_action"], "connect_project");

        let body = WaveError::NoActiveTask.to_body();
        assert_eq!(body["recovery"]["next_action"], "current_task_init");
    }

    #[test]
    fn test_plan_gate_carries_pending_evrs() {
        let err = WaveError::PlanGateBlocked {
            plan_id: "plan-a".into(),
            evr_for_plan: vec!["evr-1".into()],
        };
        let body = err.to_body();
        assert_eq!(body["error_code"], "PLAN_GATE_BLOCKED");
        assert_eq!(body["recovery"]["evr_for_plan"][0], "evr-1");
    }

    #[test]
    fn test_unready_reason_serialization() {
        let req = EvrRequirement {
            evr_id: "evr-2".into(),
            reason: UnreadyReason::NeedReasonForSkip,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["reason"], "need_reason_for_skip");
    }
}
