//! Notifier push behavior against a live registry.

mod common;

use common::{call, test_deps};
use serde_json::json;
use tandem::domain::models::{AutoRespondConfig, NotifierConfig};
use tandem::services::{Notifier, PairUpdate, PUSH_CHANNEL_CAPACITY};
use tokio::sync::mpsc;
use uuid::Uuid;

fn notifier(dir: &std::path::Path, auto: Vec<AutoRespondConfig>) -> Notifier {
    Notifier::new(NotifierConfig::default(), auto, dir.join("locks"))
}

#[tokio::test]
async fn push_sent_once_per_count_change() {
    let dir = tempfile::tempdir().unwrap();
    let deps = test_deps(dir.path(), vec![]).await;
    let notifier = notifier(dir.path(), vec![]);

    let (push_tx, mut push_rx) = mpsc::channel::<PairUpdate>(PUSH_CHANNEL_CAPACITY);
    deps.registry
        .register(Uuid::new_v4(), "claude-code-1", push_tx);

    call(
        &deps,
        "send_message",
        json!({ "from": "cursor", "to": "claude-code-1", "content": "hi" }),
    )
    .await
    .unwrap();

    notifier.push_updates(&deps.coordinator, &deps.registry).await;
    let update = push_rx.try_recv().unwrap();
    assert_eq!(update.unread_messages, 1);
    assert!(update.summary.contains("1 unread"));

    // Counts unchanged: no duplicate push.
    notifier.push_updates(&deps.coordinator, &deps.registry).await;
    assert!(push_rx.try_recv().is_err());

    // A second message changes the counts and produces a fresh push.
    call(
        &deps,
        "send_message",
        json!({ "from": "cursor", "to": "claude-code-1", "content": "again" }),
    )
    .await
    .unwrap();
    notifier.push_updates(&deps.coordinator, &deps.registry).await;
    assert_eq!(push_rx.try_recv().unwrap().unread_messages, 2);
}

#[tokio::test]
async fn disconnected_agents_get_no_push() {
    let dir = tempfile::tempdir().unwrap();
    let deps = test_deps(dir.path(), vec![]).await;
    let notifier = notifier(dir.path(), vec![]);

    call(
        &deps,
        "send_message",
        json!({ "from": "cursor", "to": "nobody-connected", "content": "hi" }),
    )
    .await
    .unwrap();

    // Nothing registered: push_updates is a no-op rather than an error.
    notifier.push_updates(&deps.coordinator, &deps.registry).await;
}

#[tokio::test]
async fn auto_spawn_wakes_offline_agent_once() {
    let dir = tempfile::tempdir().unwrap();
    let deps = test_deps(dir.path(), vec![]).await;

    let marker = dir.path().join("woken");
    let auto = vec![AutoRespondConfig {
        agent: "cursor".to_string(),
        command: format!("echo woken > {}", marker.display()),
        cooldown_sec: 300,
    }];
    let notifier = notifier(dir.path(), auto);

    call(
        &deps,
        "send_message",
        json!({ "from": "claude-code-1", "to": "cursor", "content": "need review" }),
    )
    .await
    .unwrap();

    notifier
        .auto_spawn_wakeups(&deps.coordinator, &deps.registry)
        .await;

    // The wake command runs detached; give it a moment.
    for _ in 0..50 {
        if marker.exists() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(marker.exists());

    // Cooldown suppresses an immediate second wake.
    std::fs::remove_file(&marker).unwrap();
    notifier
        .auto_spawn_wakeups(&deps.coordinator, &deps.registry)
        .await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(!marker.exists());
}

#[tokio::test]
async fn auto_spawn_skips_connected_agents() {
    let dir = tempfile::tempdir().unwrap();
    let deps = test_deps(dir.path(), vec![]).await;

    let marker = dir.path().join("woken");
    let auto = vec![AutoRespondConfig {
        agent: "cursor".to_string(),
        command: format!("echo woken > {}", marker.display()),
        cooldown_sec: 0,
    }];
    let notifier = notifier(dir.path(), auto);

    let (push_tx, _rx) = mpsc::channel(PUSH_CHANNEL_CAPACITY);
    deps.registry.register(Uuid::new_v4(), "cursor", push_tx);

    call(
        &deps,
        "send_message",
        json!({ "from": "claude-code-1", "to": "cursor", "content": "hi" }),
    )
    .await
    .unwrap();

    notifier
        .auto_spawn_wakeups(&deps.coordinator, &deps.registry)
        .await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(!marker.exists());
}
