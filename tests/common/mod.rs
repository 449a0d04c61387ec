//! Common test utilities for integration tests
//!
//! Provides shared fixtures, helpers, and test utilities used across
//! multiple integration test files.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use tandem::adapters::sqlite::{open_memory_database, SqliteStateStore};
use tandem::application::WorkerManager;
use tandem::domain::errors::DomainResult;
use tandem::domain::models::{AssignmentStrategy, WorkerTypeConfig, WorktreeConfig};
use tandem::rpc::{tools, RpcDeps};
use tandem::services::{
    ChangeSignal, Coordinator, PairUpdate, PruneSettings, SessionRegistry, TaskScheduler,
    WorktreeManager, PUSH_CHANNEL_CAPACITY,
};

/// Build a full dependency bundle over an in-memory store, with the
/// change signal and worker logs rooted in the given temp directory.
pub async fn test_deps(dir: &Path, workers: Vec<WorkerTypeConfig>) -> Arc<RpcDeps> {
    let pool = open_memory_database().await.expect("test pool");
    let store = Arc::new(SqliteStateStore::new(pool));
    let coordinator = Arc::new(Coordinator::new(
        store,
        ChangeSignal::new(dir.join("state.signal")),
        PruneSettings::default(),
        dir.to_path_buf(),
    ));
    let registry = Arc::new(SessionRegistry::new());
    let scheduler = Arc::new(TaskScheduler::new(
        AssignmentStrategy::LeastLoaded,
        workers.clone(),
        Duration::from_secs(60),
    ));
    let worktrees = Arc::new(WorktreeManager::new(WorktreeConfig::default()));
    let manager = Arc::new(WorkerManager::new(
        coordinator.clone(),
        registry.clone(),
        worktrees,
        workers,
        dir.join("worker-logs"),
    ));
    Arc::new(RpcDeps {
        coordinator,
        registry,
        scheduler,
        manager,
    })
}

/// A tool response split into its payload and the piggyback banner.
#[derive(Debug)]
pub struct ToolResponse {
    pub payload: Value,
    pub banner: Option<String>,
}

/// Invoke one tool the way the RPC layer does, on a fresh session.
pub async fn call(deps: &Arc<RpcDeps>, name: &str, args: Value) -> DomainResult<ToolResponse> {
    let (push_tx, _push_rx) = mpsc::channel::<PairUpdate>(PUSH_CHANNEL_CAPACITY);
    call_on_session(deps, Uuid::new_v4(), &push_tx, name, args).await
}

/// Invoke one tool on a specific session with a caller-owned push channel.
pub async fn call_on_session(
    deps: &Arc<RpcDeps>,
    session_id: Uuid,
    push_tx: &mpsc::Sender<PairUpdate>,
    name: &str,
    args: Value,
) -> DomainResult<ToolResponse> {
    let params = json!({ "name": name, "arguments": args });
    let result = tools::handle_tools_call(deps, session_id, push_tx, params).await?;

    let text = result["content"][0]["text"]
        .as_str()
        .expect("tool responses carry text content")
        .to_string();

    // The payload is the leading JSON document; anything after it is the
    // piggyback banner.
    let mut stream = serde_json::Deserializer::from_str(&text).into_iter::<Value>();
    let payload = stream
        .next()
        .expect("tool responses start with a JSON payload")
        .expect("payload parses");
    let consumed = stream.byte_offset();
    let banner = text[consumed..].trim().to_string();
    let banner = (!banner.is_empty()).then_some(banner);

    Ok(ToolResponse { payload, banner })
}

/// Minimal worker type config for scheduler/manager tests.
pub fn worker_type(name: &str) -> WorkerTypeConfig {
    WorkerTypeConfig {
        name: name.to_string(),
        command: "true".to_string(),
        instances: 1,
        max_tasks: 1,
        capabilities: vec![],
        cooldown_sec: 30,
        timeout_sec: 0,
        max_retries: 3,
        retry_delay_sec: 10,
        starting_window_sec: 120,
        env_inherit: true,
        env_include: vec![],
        env: std::collections::HashMap::new(),
    }
}
