//! MCP tool definitions
//!
//! The 8 tools exposed by the task server.

use super::protocol::{InputSchema, ToolDefinition};
use serde_json::json;

/// Generate all tool definitions.
pub fn all_tools() -> Vec<ToolDefinition> {
    let mut tools = Vec::new();
    tools.extend(project_tools());
    tools.extend(task_tools());
    tools
}

// ============================================================================
// Project tools (2)
// ============================================================================

fn project_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "project_info".to_string(),
            description: "Describe the session: bound project, active task, recent tasks, and the suggested next action".to_string(),
            input_schema: InputSchema {
                schema_type: "object".to_string(),
                properties: None,
                required: None,
            },
        },
        ToolDefinition {
            name: "connect_project".to_string(),
            description: "Bind this session to a project by exactly one of root, slug, or repo".to_string(),
            input_schema: InputSchema {
                schema_type: "object".to_string(),
                properties: Some(json!({
                    "root": {"type": "string", "description": "Path to the project root"},
                    "slug": {"type": "string", "description": "Registered project slug"},
                    "repo": {"type": "string", "description": "Repository URL"}
                })),
                required: None,
            },
        },
    ]
}

// ============================================================================
// Task tools (6)
// ============================================================================

fn task_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "current_task_init".to_string(),
            description: "Create a new task with a title, goal, and optional initial plan list".to_string(),
            input_schema: InputSchema {
                schema_type: "object".to_string(),
                properties: Some(json!({
                    "title": {"type": "string", "description": "Task title"},
                    "goal": {"type": "string", "description": "What done looks like"},
                    "plans": {"type": "array", "items": {"type": "string"}, "description": "Initial plan descriptions, in order"}
                })),
                required: Some(vec!["title".to_string(), "goal".to_string()]),
            },
        },
        ToolDefinition {
            name: "current_task_read".to_string(),
            description: "Read the active task with EVR readiness, pending panel edits, a sync preview, and log highlights".to_string(),
            input_schema: InputSchema {
                schema_type: "object".to_string(),
                properties: Some(json!({
                    "request_id": {"type": "string", "description": "Caller-unique id; repeated reads with the same id reuse the cached sync result"},
                    "strategy": {"type": "string", "description": "Conflict strategy for the preview (ts_only, etag_first_then_ts)"}
                })),
                required: None,
            },
        },
        ToolDefinition {
            name: "current_task_update".to_string(),
            description: "Change a plan or step status, or record an EVR verification run. Plan completion is gated on its bound EVRs".to_string(),
            input_schema: InputSchema {
                schema_type: "object".to_string(),
                properties: Some(json!({
                    "target": {"type": "string", "description": "plan, step, or evr"},
                    "id": {"type": "string", "description": "Anchor id of the target"},
                    "status": {"type": "string", "description": "plan/step: to_do, in_progress, completed, blocked; evr: pass, fail, skip, unknown"},
                    "evidence": {"type": "string", "description": "Evidence URL for plan/step"},
                    "notes": {"type": "string", "description": "Notes; required as the reason when skipping an EVR"},
                    "proof": {"type": "string", "description": "Proof URL or path for an EVR run"},
                    "actor": {"type": "string", "description": "Who ran the verification: ai, user, or ci (default ai)"},
                    "expected_version": {"type": "integer", "description": "Reject if the stored task version differs"}
                })),
                required: Some(vec!["target".to_string(), "id".to_string()]),
            },
        },
        ToolDefinition {
            name: "current_task_modify".to_string(),
            description: "Edit content fields (goal, title, hints, requirements, issues, plan/step text) and create, update, or remove EVRs bound to a plan".to_string(),
            input_schema: InputSchema {
                schema_type: "object".to_string(),
                properties: Some(json!({
                    "target": {"type": "string", "description": "goal, title, hints, requirements, issues, plan_text, step_text, plan_hints, step_hints, or evr"},
                    "id": {"type": "string", "description": "Entity id for plan/step/evr targets"},
                    "value": {"description": "New value: string for text targets, array of strings for list targets"},
                    "op": {"type": "string", "description": "For target=evr: create, update, or remove"},
                    "plan_id": {"type": "string", "description": "For EVR create: the plan the EVR is bound to"},
                    "evr": {"type": "object", "description": "For EVR create/update: title, verify, expect, class"},
                    "expected_version": {"type": "integer", "description": "Reject if the stored task version differs"}
                })),
                required: Some(vec!["target".to_string()]),
            },
        },
        ToolDefinition {
            name: "current_task_complete".to_string(),
            description: "Complete the active task. Blocked until every EVR is pass or skip-with-reason, with fresh runs for runtime-class EVRs".to_string(),
            input_schema: InputSchema {
                schema_type: "object".to_string(),
                properties: Some(json!({
                    "expected_version": {"type": "integer", "description": "Reject if the stored task version differs"}
                })),
                required: None,
            },
        },
        ToolDefinition {
            name: "current_task_log".to_string(),
            description: "Append one entry to the task's append-only log".to_string(),
            input_schema: InputSchema {
                schema_type: "object".to_string(),
                properties: Some(json!({
                    "level": {"type": "string", "description": "INFO, WARN, or ERROR (default INFO)"},
                    "category": {"type": "string", "description": "Log category, e.g. task, plan, verify"},
                    "action": {"type": "string", "description": "Short action label"},
                    "message": {"type": "string", "description": "Log message"},
                    "ai_notes": {"type": "string", "description": "Optional free-form notes"}
                })),
                required: Some(vec!["message".to_string()]),
            },
        },
    ]
}
