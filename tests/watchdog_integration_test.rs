//! Watchdog behavior against a live coordinator.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::test_deps;
use serde_json::json;
use tandem::domain::models::{TaskStatus, WatchdogConfig};
use tandem::services::Watchdog;
use tokio::sync::mpsc;

fn watchdog_config() -> WatchdogConfig {
    WatchdogConfig {
        tick_interval_sec: 1,
        warning_sec: 180,
        critical_sec: 300,
        recovery_sec: 600,
    }
}

/// Rewind an instance's heartbeat so threshold crossings can be observed
/// without waiting.
async fn rewind_heartbeat(deps: &Arc<tandem::rpc::RpcDeps>, agent: &str, seconds: i64) {
    let agent = agent.to_string();
    deps.coordinator
        .run(move |state| {
            if let Some(inst) = state.agents.get_mut(&agent) {
                inst.last_heartbeat = Utc::now() - chrono::Duration::seconds(seconds);
            }
            Ok(())
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn escalation_warning_critical_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let deps = test_deps(dir.path(), vec![]).await;
    let (tx, mut rx) = mpsc::channel(8);
    let watchdog = Watchdog::new(watchdog_config(), tx);

    // Driver presence so alerts have a recipient; worker claims a task.
    common::call(
        &deps,
        "set_presence",
        json!({ "agent": "cursor", "status": "active", "workspace": dir.path().to_str().unwrap() }),
    )
    .await
    .unwrap();
    common::call(
        &deps,
        "create_task",
        json!({ "title": "T", "assigned_to": "any", "created_by": "cursor" }),
    )
    .await
    .unwrap();
    common::call(&deps, "claim_next", json!({ "agent": "claude-code-1" }))
        .await
        .unwrap();

    let driver_messages = |deps: &Arc<tandem::rpc::RpcDeps>| {
        let deps = deps.clone();
        async move {
            deps.coordinator
                .query(|s| {
                    s.messages
                        .iter()
                        .filter(|m| m.to == "cursor" && m.from == "system")
                        .map(|m| m.content.clone())
                        .collect::<Vec<_>>()
                })
                .await
                .unwrap()
        }
    };

    // 200s silent: one warning, and re-ticking does not duplicate it.
    rewind_heartbeat(&deps, "claude-code-1", 200).await;
    watchdog.tick(&deps.coordinator, &deps.scheduler).await.unwrap();
    watchdog.tick(&deps.coordinator, &deps.scheduler).await.unwrap();
    let msgs = driver_messages(&deps).await;
    assert_eq!(msgs.iter().filter(|m| m.contains("WARNING")).count(), 1);

    // 350s silent: exactly one critical.
    rewind_heartbeat(&deps, "claude-code-1", 350).await;
    watchdog.tick(&deps.coordinator, &deps.scheduler).await.unwrap();
    let msgs = driver_messages(&deps).await;
    assert_eq!(msgs.iter().filter(|m| m.contains("CRITICAL")).count(), 1);

    // 700s silent: recovery cancels the task, marks the instance
    // offline, and releases the slot.
    rewind_heartbeat(&deps, "claude-code-1", 700).await;
    watchdog.tick(&deps.coordinator, &deps.scheduler).await.unwrap();

    let (task_status, agent_status, held) = deps
        .coordinator
        .query(|s| {
            (
                s.task(1).unwrap().status,
                s.agents["claude-code-1"].status,
                s.agents["claude-code-1"].current_tasks.clone(),
            )
        })
        .await
        .unwrap();
    assert_eq!(task_status, TaskStatus::Cancelled);
    assert_eq!(agent_status.as_str(), "offline");
    assert!(held.is_empty());

    let released = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("slot release arrives")
        .unwrap();
    assert_eq!(released, "claude-code-1");
}

#[tokio::test]
async fn heartbeat_resets_escalation() {
    let dir = tempfile::tempdir().unwrap();
    let deps = test_deps(dir.path(), vec![]).await;
    let (tx, _rx) = mpsc::channel(8);
    let watchdog = Watchdog::new(watchdog_config(), tx);

    common::call(
        &deps,
        "set_presence",
        json!({ "agent": "cursor", "status": "active", "workspace": dir.path().to_str().unwrap() }),
    )
    .await
    .unwrap();
    common::call(&deps, "heartbeat", json!({ "agent": "claude-code-1" }))
        .await
        .unwrap();

    rewind_heartbeat(&deps, "claude-code-1", 200).await;
    watchdog.tick(&deps.coordinator, &deps.scheduler).await.unwrap();

    // The worker comes back; the next silence starts a fresh sequence.
    common::call(&deps, "heartbeat", json!({ "agent": "claude-code-1" }))
        .await
        .unwrap();
    rewind_heartbeat(&deps, "claude-code-1", 200).await;
    watchdog.tick(&deps.coordinator, &deps.scheduler).await.unwrap();

    let warnings = deps
        .coordinator
        .query(|s| {
            s.messages
                .iter()
                .filter(|m| m.content.contains("WARNING"))
                .count()
        })
        .await
        .unwrap();
    assert_eq!(warnings, 2);
}

#[tokio::test]
async fn sla_over_message_is_unique_and_clears_on_completion() {
    let dir = tempfile::tempdir().unwrap();
    let deps = test_deps(dir.path(), vec![]).await;
    let (tx, _rx) = mpsc::channel(8);
    let watchdog = Watchdog::new(watchdog_config(), tx);

    common::call(
        &deps,
        "set_presence",
        json!({ "agent": "cursor", "status": "active", "workspace": dir.path().to_str().unwrap() }),
    )
    .await
    .unwrap();
    common::call(
        &deps,
        "create_task",
        json!({
            "title": "T3",
            "assigned_to": "any",
            "created_by": "cursor",
            "expected_duration_sec": 60
        }),
    )
    .await
    .unwrap();
    common::call(&deps, "claim_next", json!({ "agent": "claude-code-1" }))
        .await
        .unwrap();

    // Unchanged for 120s while in progress.
    deps.coordinator
        .run(|state| {
            let task = state.task_mut(1).unwrap();
            task.updated_at = Utc::now() - chrono::Duration::seconds(120);
            Ok(())
        })
        .await
        .unwrap();

    watchdog.tick(&deps.coordinator, &deps.scheduler).await.unwrap();
    watchdog.tick(&deps.coordinator, &deps.scheduler).await.unwrap();

    let (sla_over, sla_messages) = deps
        .coordinator
        .query(|s| {
            (
                s.task(1).unwrap().sla_over,
                s.messages
                    .iter()
                    .filter(|m| m.content.contains("SLA"))
                    .count(),
            )
        })
        .await
        .unwrap();
    assert!(sla_over);
    assert_eq!(sla_messages, 1);

    // worker_status reports the task as over its SLA.
    let status = common::call(&deps, "worker_status", json!({}))
        .await
        .unwrap();
    let tasks = status.payload["workers"][0]["current_tasks"].clone();
    assert_eq!(tasks[0]["sla_status"], "over");

    // Leaving in_progress clears the flag.
    common::call(
        &deps,
        "update_task",
        json!({ "id": 1, "status": "completed", "updated_by": "claude-code-1" }),
    )
    .await
    .unwrap();
    let sla_over = deps
        .coordinator
        .query(|s| s.task(1).unwrap().sla_over)
        .await
        .unwrap();
    assert!(!sla_over);
}
