//! EVR gate tests driven through the tool surface
//!
//! Seed scenarios: plan gate blocking completion, skip-without-reason
//! blocking the task gate, and recovery payload shapes.

use serde_json::json;
use waveboard::mcp::ToolHandler;
use waveboard::project::ProjectRegistry;

async fn connected_handler(tmp: &tempfile::TempDir) -> ToolHandler {
    let project = tmp.path().join("project");
    std::fs::create_dir_all(&project).unwrap();
    let mut handler = ToolHandler::new(ProjectRegistry::new(tmp.path().join("registry.json")));
    let body = handler
        .handle(
            "connect_project",
            Some(json!({"root": project.display().to_string()})),
        )
        .await
        .unwrap();
    assert_eq!(body["success"], true, "{}", body);
    handler
}

async fn init_with_plan(handler: &mut ToolHandler) -> String {
    let body = handler
        .handle(
            "current_task_init",
            Some(json!({"title": "Gated Task", "goal": "ship it", "plans": ["build the thing"]})),
        )
        .await
        .unwrap();
    assert_eq!(body["success"], true, "{}", body);
    body["task"]["plans"][0]["id"].as_str().unwrap().to_string()
}

async fn create_evr(handler: &mut ToolHandler, plan_id: &str, title: &str) -> String {
    let body = handler
        .handle(
            "current_task_modify",
            Some(json!({
                "target": "evr",
                "op": "create",
                "plan_id": plan_id,
                "evr": {"title": title, "verify": "run the check", "expect": "it passes"}
            })),
        )
        .await
        .unwrap();
    assert_eq!(body["success"], true, "{}", body);
    body["modified_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_plan_gate_blocks_completion_until_pass() {
    let tmp = tempfile::tempdir().unwrap();
    let mut handler = connected_handler(&tmp).await;
    let plan_id = init_with_plan(&mut handler).await;
    let evr_id = create_evr(&mut handler, &plan_id, "build passes").await;

    // Unknown EVR blocks the plan gate.
    let body = handler
        .handle(
            "current_task_update",
            Some(json!({"target": "plan", "id": plan_id, "status": "completed"})),
        )
        .await
        .unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error_code"], "PLAN_GATE_BLOCKED");
    assert_eq!(body["recovery"]["evr_for_plan"], json!([evr_id]));

    // A pass run clears it.
    let body = handler
        .handle(
            "current_task_update",
            Some(json!({"target": "evr", "id": evr_id, "status": "pass"})),
        )
        .await
        .unwrap();
    assert_eq!(body["success"], true, "{}", body);

    let body = handler
        .handle(
            "current_task_update",
            Some(json!({"target": "plan", "id": plan_id, "status": "completed"})),
        )
        .await
        .unwrap();
    assert_eq!(body["success"], true, "{}", body);
}

#[tokio::test]
async fn test_skip_without_reason_blocks_task_completion() {
    let tmp = tempfile::tempdir().unwrap();
    let mut handler = connected_handler(&tmp).await;
    let plan_id = init_with_plan(&mut handler).await;
    let evr_id = create_evr(&mut handler, &plan_id, "optional probe").await;

    // Skip with empty notes is not admissible.
    handler
        .handle(
            "current_task_update",
            Some(json!({"target": "evr", "id": evr_id, "status": "skip"})),
        )
        .await
        .unwrap();

    let body = handler.handle("current_task_complete", None).await.unwrap();
    assert_eq!(body["error_code"], "EVR_NOT_READY");
    let required = body["recovery"]["evr_required_final"].as_array().unwrap();
    assert_eq!(required.len(), 1);
    assert_eq!(required[0]["evr_id"], evr_id.as_str());
    assert_eq!(required[0]["reason"], "need_reason_for_skip");
    assert!(body["recovery"]["evr_summary"]["skipped"]
        .as_array()
        .unwrap()
        .contains(&json!(evr_id)));

    // Non-empty notes make the skip admissible.
    handler
        .handle(
            "current_task_update",
            Some(json!({
                "target": "evr", "id": evr_id, "status": "skip",
                "notes": "covered by the nightly e2e suite"
            })),
        )
        .await
        .unwrap();
    let body = handler.handle("current_task_complete", None).await.unwrap();
    assert_eq!(body["success"], true, "{}", body);

    // The completed task rejects further mutation.
    let body = handler
        .handle(
            "current_task_log",
            Some(json!({"message": "too late"})),
        )
        .await
        .unwrap();
    assert_eq!(body["error_code"], "INVALID_STATE_TRANSITION");
}

#[tokio::test]
async fn test_runtime_evr_needs_second_look_after_plan_completes() {
    let tmp = tempfile::tempdir().unwrap();
    let mut handler = connected_handler(&tmp).await;
    let plan_id = init_with_plan(&mut handler).await;
    let evr_id = create_evr(&mut handler, &plan_id, "service responds").await;

    // Pass once, then complete the plan: the pass predates completion.
    handler
        .handle(
            "current_task_update",
            Some(json!({"target": "evr", "id": evr_id, "status": "pass"})),
        )
        .await
        .unwrap();
    let body = handler
        .handle(
            "current_task_update",
            Some(json!({"target": "plan", "id": plan_id, "status": "completed"})),
        )
        .await
        .unwrap();
    assert_eq!(body["success"], true, "{}", body);

    // Runtime class demands a fresh pass after the plan completed.
    let body = handler.handle("current_task_complete", None).await.unwrap();
    assert_eq!(body["error_code"], "EVR_NOT_READY");
    assert_eq!(
        body["recovery"]["evr_required_final"][0]["reason"],
        "status_unknown"
    );

    // The second look satisfies the task gate.
    handler
        .handle(
            "current_task_update",
            Some(json!({"target": "evr", "id": evr_id, "status": "pass", "proof": "logs/run-2.txt"})),
        )
        .await
        .unwrap();
    let body = handler.handle("current_task_complete", None).await.unwrap();
    assert_eq!(body["success"], true, "{}", body);
}

#[tokio::test]
async fn test_blocked_plan_cannot_complete_directly() {
    let tmp = tempfile::tempdir().unwrap();
    let mut handler = connected_handler(&tmp).await;
    let plan_id = init_with_plan(&mut handler).await;

    handler
        .handle(
            "current_task_update",
            Some(json!({"target": "plan", "id": plan_id, "status": "blocked"})),
        )
        .await
        .unwrap();
    let body = handler
        .handle(
            "current_task_update",
            Some(json!({"target": "plan", "id": plan_id, "status": "completed"})),
        )
        .await
        .unwrap();
    assert_eq!(body["error_code"], "INVALID_STATE_TRANSITION");
}

#[tokio::test]
async fn test_read_reports_evr_readiness() {
    let tmp = tempfile::tempdir().unwrap();
    let mut handler = connected_handler(&tmp).await;
    let plan_id = init_with_plan(&mut handler).await;
    let evr_id = create_evr(&mut handler, &plan_id, "health check").await;

    let body = handler.handle("current_task_read", None).await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["evr_ready"], false);
    assert!(body["evr_summary"]["unknown"]
        .as_array()
        .unwrap()
        .contains(&json!(evr_id)));
    let details = body["evr_details"].as_array().unwrap();
    assert_eq!(details[0]["id"], evr_id.as_str());
    assert_eq!(details[0]["ready"], false);
    assert_eq!(details[0]["reason"], "status_unknown");
}
