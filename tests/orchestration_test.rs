//! End-to-end orchestration flows through the tool surface.

mod common;

use common::{call, test_deps, worker_type};
use serde_json::json;
use tandem::domain::errors::DomainError;
use tandem::domain::models::TaskStatus;

#[tokio::test]
async fn create_then_claim_assigns_task_to_instance() {
    let dir = tempfile::tempdir().unwrap();
    let deps = test_deps(dir.path(), vec![]).await;

    let created = call(
        &deps,
        "create_task",
        json!({ "title": "T1", "assigned_to": "any", "created_by": "cursor" }),
    )
    .await
    .unwrap();
    assert_eq!(created.payload["id"], 1);
    assert_eq!(created.payload["status"], "pending");

    let claimed = call(&deps, "claim_next", json!({ "agent": "claude-code-1" }))
        .await
        .unwrap();
    assert_eq!(claimed.payload["claimed"], true);
    assert_eq!(claimed.payload["task"]["id"], 1);
    assert_eq!(claimed.payload["task"]["status"], "in_progress");
    assert_eq!(claimed.payload["task"]["assigned_to"], "claude-code-1");

    let (current_tasks, status) = deps
        .coordinator
        .query(|state| {
            let inst = state.agents.get("claude-code-1").cloned().unwrap();
            (inst.current_tasks, inst.status)
        })
        .await
        .unwrap();
    assert_eq!(current_tasks, vec![1]);
    assert_eq!(status.as_str(), "busy");
}

#[tokio::test]
async fn dry_run_claim_does_not_mutate() {
    let dir = tempfile::tempdir().unwrap();
    let deps = test_deps(dir.path(), vec![]).await;

    call(
        &deps,
        "create_task",
        json!({ "title": "T", "assigned_to": "any", "created_by": "cursor" }),
    )
    .await
    .unwrap();

    let peeked = call(
        &deps,
        "claim_next",
        json!({ "agent": "claude-code-1", "dry_run": true }),
    )
    .await
    .unwrap();
    assert_eq!(peeked.payload["claimed"], false);
    assert_eq!(peeked.payload["task"]["id"], 1);

    let status = deps
        .coordinator
        .query(|state| state.task(1).unwrap().status)
        .await
        .unwrap();
    assert_eq!(status, TaskStatus::Pending);
}

#[tokio::test]
async fn claim_prefers_direct_assignment_then_priority() {
    let dir = tempfile::tempdir().unwrap();
    let deps = test_deps(dir.path(), vec![]).await;

    call(
        &deps,
        "create_task",
        json!({ "title": "open", "assigned_to": "any", "created_by": "cursor", "priority": 1 }),
    )
    .await
    .unwrap();
    call(
        &deps,
        "create_task",
        json!({ "title": "mine", "assigned_to": "claude-code-1", "created_by": "cursor", "priority": 5 }),
    )
    .await
    .unwrap();

    // Direct assignment wins over a higher-priority open task.
    let claimed = call(&deps, "claim_next", json!({ "agent": "claude-code-1" }))
        .await
        .unwrap();
    assert_eq!(claimed.payload["task"]["title"], "mine");
}

#[tokio::test]
async fn claim_respects_dependencies() {
    let dir = tempfile::tempdir().unwrap();
    let deps = test_deps(dir.path(), vec![]).await;

    let dep = call(
        &deps,
        "create_task",
        json!({ "title": "dep", "assigned_to": "any", "created_by": "cursor" }),
    )
    .await
    .unwrap();
    let dep_id = dep.payload["id"].as_i64().unwrap();

    call(
        &deps,
        "create_task",
        json!({
            "title": "blocked",
            "assigned_to": "claude-code-1",
            "created_by": "cursor",
            "dependencies": [dep_id]
        }),
    )
    .await
    .unwrap();

    // Only the dependency is claimable; the dependent stays pending even
    // though it is directly assigned.
    let first = call(&deps, "claim_next", json!({ "agent": "claude-code-1" }))
        .await
        .unwrap();
    assert_eq!(first.payload["task"]["title"], "dep");

    call(
        &deps,
        "update_task",
        json!({ "id": dep_id, "status": "completed", "updated_by": "claude-code-1" }),
    )
    .await
    .unwrap();

    let second = call(&deps, "claim_next", json!({ "agent": "claude-code-1" }))
        .await
        .unwrap();
    assert_eq!(second.payload["task"]["title"], "blocked");
}

#[tokio::test]
async fn completion_notifies_creator() {
    let dir = tempfile::tempdir().unwrap();
    let deps = test_deps(dir.path(), vec![]).await;

    call(
        &deps,
        "create_task",
        json!({ "title": "T", "assigned_to": "claude-code-1", "created_by": "cursor" }),
    )
    .await
    .unwrap();
    call(&deps, "claim_next", json!({ "agent": "claude-code-1" }))
        .await
        .unwrap();
    call(
        &deps,
        "update_task",
        json!({ "id": 1, "status": "completed", "updated_by": "claude-code-1", "result_summary": "done" }),
    )
    .await
    .unwrap();

    let counts = deps.coordinator.counts_for("cursor").await.unwrap();
    assert_eq!(counts.unread_messages, 1);

    // The completed task left the instance's current set.
    let held = deps
        .coordinator
        .query(|s| s.agents["claude-code-1"].current_tasks.clone())
        .await
        .unwrap();
    assert!(held.is_empty());
}

#[tokio::test]
async fn terminal_status_transitions_are_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let deps = test_deps(dir.path(), vec![]).await;

    call(
        &deps,
        "create_task",
        json!({ "title": "T", "assigned_to": "any", "created_by": "cursor" }),
    )
    .await
    .unwrap();
    call(
        &deps,
        "update_task",
        json!({ "id": 1, "status": "cancelled", "updated_by": "cursor" }),
    )
    .await
    .unwrap();

    let err = call(
        &deps,
        "update_task",
        json!({ "id": 1, "status": "pending", "updated_by": "cursor" }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
}

#[tokio::test]
async fn cancel_agent_cancels_tasks_and_stop_banner_appears_once() {
    let dir = tempfile::tempdir().unwrap();
    let deps = test_deps(dir.path(), vec![]).await;

    call(
        &deps,
        "create_task",
        json!({ "title": "T2", "assigned_to": "any", "created_by": "cursor" }),
    )
    .await
    .unwrap();
    call(&deps, "claim_next", json!({ "agent": "claude-code-1" }))
        .await
        .unwrap();

    let cancelled = call(
        &deps,
        "cancel_agent",
        json!({ "agent": "claude-code-1", "cancelled_by": "cursor", "reason": "slow" }),
    )
    .await
    .unwrap();
    assert_eq!(cancelled.payload["cancelled_tasks"], json!([1]));

    let status = deps
        .coordinator
        .query(|s| s.task(1).unwrap().status)
        .await
        .unwrap();
    assert_eq!(status, TaskStatus::Cancelled);

    // The worker's next tool call carries the STOP banner.
    let next = call(&deps, "heartbeat", json!({ "agent": "claude-code-1" }))
        .await
        .unwrap();
    assert!(next.banner.as_deref().unwrap_or("").starts_with("STOP"));

    // Seen once, the STOP is acknowledged; the banner downgrades to the
    // ordinary unread-message line on the following call.
    let after = call(&deps, "heartbeat", json!({ "agent": "claude-code-1" }))
        .await
        .unwrap();
    assert!(!after.banner.as_deref().unwrap_or("").starts_with("STOP"));

    let counts = deps
        .coordinator
        .counts_for("claude-code-1")
        .await
        .unwrap();
    assert_eq!(counts.cancelled_uninformed, 0);
}

#[tokio::test]
async fn report_progress_updates_task_and_heartbeats() {
    let dir = tempfile::tempdir().unwrap();
    let deps = test_deps(dir.path(), vec![]).await;

    call(
        &deps,
        "create_task",
        json!({ "title": "T", "assigned_to": "any", "created_by": "cursor" }),
    )
    .await
    .unwrap();
    call(&deps, "claim_next", json!({ "agent": "claude-code-1" }))
        .await
        .unwrap();

    let before = deps
        .coordinator
        .query(|s| s.agents["claude-code-1"].last_heartbeat)
        .await
        .unwrap();

    let updated = call(
        &deps,
        "report_progress",
        json!({
            "agent": "claude-code-1",
            "task_id": 1,
            "description": "halfway",
            "percent_complete": 50
        }),
    )
    .await
    .unwrap();
    assert_eq!(updated.payload["progress_percent"], 50);
    assert_eq!(updated.payload["progress_description"], "halfway");

    let after = deps
        .coordinator
        .query(|s| s.agents["claude-code-1"].last_heartbeat)
        .await
        .unwrap();
    assert!(after >= before);
}

#[tokio::test]
async fn unrouted_tasks_are_scheduled_to_worker_types() {
    let dir = tempfile::tempdir().unwrap();
    let deps = test_deps(dir.path(), vec![worker_type("claude-code")]).await;

    call(
        &deps,
        "create_task",
        json!({ "title": "T", "assigned_to": "any", "created_by": "cursor" }),
    )
    .await
    .unwrap();

    deps.coordinator
        .run(|state| Ok(deps.scheduler.tick(state)))
        .await
        .unwrap();

    let assigned = deps
        .coordinator
        .query(|s| s.task(1).unwrap().assigned_to.clone())
        .await
        .unwrap();
    assert_eq!(assigned, "claude-code");

    // A type-routed task is claimable by an instance of that type.
    let claimed = call(&deps, "claim_next", json!({ "agent": "claude-code-1" }))
        .await
        .unwrap();
    assert_eq!(claimed.payload["claimed"], true);
}

#[tokio::test]
async fn workspace_follow_through_presence() {
    let dir = tempfile::tempdir().unwrap();
    let deps = test_deps(dir.path(), vec![]).await;

    call(
        &deps,
        "set_presence",
        json!({ "agent": "cursor", "status": "active", "workspace": "/a" }),
    )
    .await
    .unwrap();
    assert_eq!(deps.coordinator.workspace(), std::path::PathBuf::from("/a"));

    call(
        &deps,
        "set_presence",
        json!({ "agent": "cursor", "status": "active", "workspace": "/b" }),
    )
    .await
    .unwrap();
    assert_eq!(deps.coordinator.workspace(), std::path::PathBuf::from("/b"));
}

#[tokio::test]
async fn piggyback_banner_reports_unread_and_pending() {
    let dir = tempfile::tempdir().unwrap();
    let deps = test_deps(dir.path(), vec![]).await;

    call(
        &deps,
        "send_message",
        json!({ "from": "cursor", "to": "claude-code-1", "content": "hello" }),
    )
    .await
    .unwrap();
    call(
        &deps,
        "create_task",
        json!({ "title": "T", "assigned_to": "claude-code-1", "created_by": "cursor" }),
    )
    .await
    .unwrap();

    let response = call(&deps, "heartbeat", json!({ "agent": "claude-code-1" }))
        .await
        .unwrap();
    let banner = response.banner.unwrap();
    assert!(banner.contains("1 unread"));
    assert!(banner.contains("1 pending"));
}
