//! Worker process manager.
//!
//! For each configured worker type, keeps up to `instances` live
//! processes running while pending assignments exist, with cooldown
//! between spawns, a retry budget with quarantine, wall-clock timeouts,
//! a starting window for instances that never connect, and optional git
//! worktree isolation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AgentInstance, AgentRole, AgentStatus, SharedState, TaskStatus, WorkerTypeConfig,
    WorktreeCleanup,
};
use crate::services::{Coordinator, SessionRegistry, WorktreeManager};

use super::worker_env::{build_environment, expand_command};

/// Grace period between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Live observability snapshot of one managed process.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ProcessSnapshot {
    pub instance_id: String,
    pub started_at: DateTime<Utc>,
    pub last_output_at: DateTime<Utc>,
    pub output_bytes: u64,
    pub workspace_dir: String,
}

struct ProcessInfo {
    instance_id: String,
    started_at: DateTime<Utc>,
    last_output_at: Arc<StdMutex<DateTime<Utc>>>,
    output_bytes: Arc<AtomicU64>,
    workspace_dir: PathBuf,
    child: Child,
    pid: Option<u32>,
    has_worktree: bool,
    term_sent_at: Option<DateTime<Utc>>,
    connected_once: bool,
}

impl ProcessInfo {
    fn snapshot(&self) -> ProcessSnapshot {
        ProcessSnapshot {
            instance_id: self.instance_id.clone(),
            started_at: self.started_at,
            last_output_at: self
                .last_output_at
                .lock()
                .map(|t| *t)
                .unwrap_or(self.started_at),
            output_bytes: self.output_bytes.load(Ordering::Relaxed),
            workspace_dir: self.workspace_dir.to_string_lossy().into_owned(),
        }
    }
}

struct TypeState {
    config: WorkerTypeConfig,
    last_spawn_at: Option<DateTime<Utc>>,
    failure_count: u32,
    quarantined: bool,
    /// Earliest moment a re-spawn after failure may happen.
    retry_at: Option<DateTime<Utc>>,
    processes: HashMap<String, ProcessInfo>,
}

impl TypeState {
    fn new(config: WorkerTypeConfig) -> Self {
        Self {
            config,
            last_spawn_at: None,
            failure_count: 0,
            quarantined: false,
            retry_at: None,
            processes: HashMap::new(),
        }
    }

    /// The spawn gate, minus the pending-work and session checks the
    /// caller supplies.
    fn spawn_eligible(&self, pending: usize, type_has_session: bool, now: DateTime<Utc>) -> bool {
        if pending == 0 || self.quarantined || type_has_session {
            return false;
        }
        if self.processes.len() as u32 >= self.config.instances {
            return false;
        }
        if let Some(last) = self.last_spawn_at {
            if (now - last).num_seconds() < self.config.cooldown_sec as i64 {
                return false;
            }
        }
        if let Some(retry_at) = self.retry_at {
            if now < retry_at {
                return false;
            }
        }
        true
    }

    /// Lowest unused instance id for this type, so a re-spawned worker
    /// picks up the same worktree.
    fn next_instance_id(&self) -> String {
        let mut n = 1;
        loop {
            let candidate = format!("{}-{}", self.config.name, n);
            if !self.processes.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

pub struct WorkerManager {
    coordinator: Arc<Coordinator>,
    registry: Arc<SessionRegistry>,
    worktrees: Arc<WorktreeManager>,
    types: Mutex<HashMap<String, TypeState>>,
    rpc_url: StdMutex<Option<String>>,
    log_dir: PathBuf,
}

impl WorkerManager {
    pub fn new(
        coordinator: Arc<Coordinator>,
        registry: Arc<SessionRegistry>,
        worktrees: Arc<WorktreeManager>,
        workers: Vec<WorkerTypeConfig>,
        log_dir: PathBuf,
    ) -> Self {
        let types = workers
            .into_iter()
            .map(|w| (w.name.clone(), TypeState::new(w)))
            .collect();
        Self {
            coordinator,
            registry,
            worktrees,
            types: Mutex::new(types),
            rpc_url: StdMutex::new(None),
            log_dir,
        }
    }

    /// Record the RPC URL workers should connect back to.
    pub fn set_rpc_url(&self, url: String) {
        if let Ok(mut slot) = self.rpc_url.lock() {
            *slot = Some(url);
        }
    }

    fn rpc_url_value(&self) -> Option<String> {
        self.rpc_url.lock().ok().and_then(|v| v.clone())
    }

    /// Supervision loop: reap exits, enforce timeouts and the starting
    /// window, spawn when eligible, and honor watchdog slot releases.
    pub async fn run_loop(
        self: Arc<Self>,
        mut recovery_rx: mpsc::Receiver<String>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("Worker manager started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.reap_exits().await;
                    self.enforce_deadlines().await;
                    self.spawn_eligible_types().await;
                }
                Some(instance_id) = recovery_rx.recv() => {
                    self.release_slot(&instance_id).await;
                }
                _ = shutdown.recv() => break,
            }
        }

        self.kill_all().await;
        info!("Worker manager stopped");
    }

    /// Collect exited children and apply retry/quarantine accounting.
    async fn reap_exits(&self) {
        let mut types = self.types.lock().await;
        for ts in types.values_mut() {
            let mut exited = Vec::new();
            for (id, proc) in ts.processes.iter_mut() {
                match proc.child.try_wait() {
                    Ok(Some(status)) => exited.push((id.clone(), status.success())),
                    Ok(None) => {}
                    Err(err) => {
                        warn!(instance_id = %id, error = %err, "try_wait failed");
                    }
                }
            }

            for (instance_id, success) in exited {
                let proc = match ts.processes.remove(&instance_id) {
                    Some(p) => p,
                    None => continue,
                };

                if success {
                    info!(instance_id = %instance_id, "Worker exited cleanly");
                    ts.failure_count = 0;
                    ts.retry_at = None;
                    if proc.has_worktree
                        && self.worktrees.cleanup_strategy() == WorktreeCleanup::OnExit
                    {
                        self.worktrees
                            .release(&self.coordinator.workspace(), &instance_id)
                            .await;
                    }
                } else {
                    ts.failure_count += 1;
                    if ts.failure_count <= ts.config.max_retries {
                        ts.retry_at = Some(
                            Utc::now() + chrono::Duration::seconds(ts.config.retry_delay_sec as i64),
                        );
                        warn!(
                            instance_id = %instance_id,
                            failure_count = ts.failure_count,
                            max_retries = ts.config.max_retries,
                            "Worker failed; re-spawn scheduled"
                        );
                    } else {
                        ts.quarantined = true;
                        error!(
                            worker_type = %ts.config.name,
                            failure_count = ts.failure_count,
                            "Worker type quarantined until restarted by the driver"
                        );
                    }
                }

                self.mark_instance_offline(&instance_id).await;
            }
        }
    }

    /// Enforce wall-clock timeouts and the starting window.
    async fn enforce_deadlines(&self) {
        let now = Utc::now();
        let mut types = self.types.lock().await;
        for ts in types.values_mut() {
            let timeout_sec = ts.config.timeout_sec;
            let starting_window = ts.config.starting_window_sec;

            for proc in ts.processes.values_mut() {
                if !proc.connected_once && self.registry.has_active_session(&proc.instance_id) {
                    proc.connected_once = true;
                }

                let age = (now - proc.started_at).num_seconds();

                // An instance that never connected within the window is a
                // failure in disguise: kill it and let reaping account it.
                if !proc.connected_once && starting_window > 0 && age > starting_window as i64 {
                    warn!(
                        instance_id = %proc.instance_id,
                        age_sec = age,
                        "Worker never connected; killing"
                    );
                    force_kill(proc);
                    continue;
                }

                if timeout_sec > 0 && age > timeout_sec as i64 {
                    match proc.term_sent_at {
                        None => {
                            info!(instance_id = %proc.instance_id, age_sec = age, "Worker timed out; terminating");
                            graceful_kill(proc);
                            proc.term_sent_at = Some(now);
                        }
                        Some(sent) if (now - sent).to_std().unwrap_or_default() > KILL_GRACE => {
                            warn!(instance_id = %proc.instance_id, "Worker ignored SIGTERM; killing");
                            force_kill(proc);
                        }
                        Some(_) => {}
                    }
                }
            }
        }
    }

    /// Spawn at most one instance per pass, picking the least loaded of
    /// the eligible types.
    async fn spawn_eligible_types(&self) {
        let snapshot = match self
            .coordinator
            .query(|state: &SharedState| {
                let pending: HashMap<String, usize> = state
                    .tasks
                    .iter()
                    .filter(|t| t.status == TaskStatus::Pending)
                    .fold(HashMap::new(), |mut acc, t| {
                        *acc.entry(t.assigned_to.clone()).or_default() += 1;
                        acc
                    });
                let load: HashMap<String, usize> = state
                    .agents
                    .values()
                    .filter(|a| a.status.is_live())
                    .fold(HashMap::new(), |mut acc, a| {
                        *acc.entry(a.agent_type.clone()).or_default() += a.current_tasks.len();
                        acc
                    });
                (pending, load)
            })
            .await
        {
            Ok(s) => s,
            Err(err) => {
                warn!(error = %err, "Spawn snapshot failed");
                return;
            }
        };
        let (pending, load) = snapshot;

        let now = Utc::now();
        let mut types = self.types.lock().await;

        let mut eligible: Vec<(&String, usize)> = types
            .iter()
            .filter_map(|(name, ts)| {
                let pending_for_type = pending.get(name).copied().unwrap_or(0);
                let has_session = self.registry.has_active_session(name);
                ts.spawn_eligible(pending_for_type, has_session, now)
                    .then(|| (name, load.get(name).copied().unwrap_or(0)))
            })
            .collect();
        eligible.sort_by_key(|(name, load)| (*load, (*name).clone()));

        let Some((name, _)) = eligible.first() else {
            return;
        };
        let name = (*name).clone();

        if let Some(ts) = types.get_mut(&name) {
            if let Err(err) = self.spawn_instance(ts).await {
                ts.failure_count += 1;
                if ts.failure_count > ts.config.max_retries {
                    ts.quarantined = true;
                }
                ts.retry_at =
                    Some(now + chrono::Duration::seconds(ts.config.retry_delay_sec as i64));
                error!(worker_type = %name, error = %err, "Spawn failed");
            }
        }
    }

    /// Spawn one instance of a type: worktree, environment, command,
    /// detached launch, output pumps, state registration.
    async fn spawn_instance(&self, ts: &mut TypeState) -> DomainResult<()> {
        let instance_id = ts.next_instance_id();
        let shared_workspace = self.coordinator.workspace();

        let (workspace_dir, has_worktree) = if self.worktrees.enabled()
            && WorktreeManager::is_git_repo(&shared_workspace).await
        {
            match self.worktrees.allocate(&shared_workspace, &instance_id).await {
                Ok(dir) => (dir, true),
                Err(err) => {
                    warn!(
                        instance_id = %instance_id,
                        error = %err,
                        "Worktree allocation failed; using shared workspace"
                    );
                    (shared_workspace.clone(), false)
                }
            }
        } else {
            (shared_workspace.clone(), false)
        };

        let env = build_environment(
            &ts.config,
            &instance_id,
            &workspace_dir,
            self.rpc_url_value().as_deref(),
        );
        let command_line = expand_command(&ts.config.command, &workspace_dir);

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&command_line)
            .current_dir(&workspace_dir)
            .env_clear()
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| DomainError::SpawnFailed {
            instance: instance_id.clone(),
            reason: e.to_string(),
        })?;

        let now = Utc::now();
        let last_output_at = Arc::new(StdMutex::new(now));
        let output_bytes = Arc::new(AtomicU64::new(0));

        let log_path = self.log_dir.join(format!("{instance_id}.log"));
        if let Some(stdout) = child.stdout.take() {
            spawn_output_pump(
                stdout,
                log_path.clone(),
                last_output_at.clone(),
                output_bytes.clone(),
            );
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_output_pump(
                stderr,
                log_path.clone(),
                last_output_at.clone(),
                output_bytes.clone(),
            );
        }

        let pid = child.id();
        info!(
            instance_id = %instance_id,
            pid = ?pid,
            workspace = %workspace_dir.display(),
            "Worker spawned"
        );

        ts.processes.insert(
            instance_id.clone(),
            ProcessInfo {
                instance_id: instance_id.clone(),
                started_at: now,
                last_output_at,
                output_bytes,
                workspace_dir,
                child,
                pid,
                has_worktree,
                term_sent_at: None,
                connected_once: false,
            },
        );
        ts.last_spawn_at = Some(now);

        // Register the instance as starting so the scheduler and the
        // watchdog can see it.
        let agent_type = ts.config.name.clone();
        let capabilities = ts.config.capabilities.clone();
        let max_tasks = ts.config.max_tasks;
        let id_for_state = instance_id.clone();
        self.coordinator
            .run(move |state| {
                let inst = state
                    .agents
                    .entry(id_for_state.clone())
                    .or_insert_with(|| {
                        AgentInstance::new(id_for_state.clone(), agent_type, AgentRole::Worker)
                    });
                inst.status = AgentStatus::Starting;
                inst.capabilities = capabilities;
                inst.max_tasks = max_tasks.max(1);
                inst.last_heartbeat = Utc::now();
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn mark_instance_offline(&self, instance_id: &str) {
        let id = instance_id.to_string();
        let result = self
            .coordinator
            .run(move |state| {
                if let Some(inst) = state.agents.get_mut(&id) {
                    if inst.status != AgentStatus::Cancelled {
                        inst.status = AgentStatus::Offline;
                    }
                }
                Ok(())
            })
            .await;
        if let Err(err) = result {
            warn!(instance_id, error = %err, "Failed to mark instance offline");
        }
    }

    /// Kill an instance's process (used by `cancel_agent`). Task and
    /// message mutations happen in the RPC layer; this handles the
    /// process and worktree side.
    pub async fn cancel_instance(&self, instance_id: &str) -> bool {
        let mut types = self.types.lock().await;
        for ts in types.values_mut() {
            if let Some(mut proc) = ts.processes.remove(instance_id) {
                force_kill(&mut proc);
                let _ = proc.child.wait().await;
                if proc.has_worktree
                    && self.worktrees.cleanup_strategy() == WorktreeCleanup::OnCancel
                {
                    self.worktrees
                        .release(&self.coordinator.workspace(), instance_id)
                        .await;
                }
                info!(instance_id, "Worker process cancelled");
                return true;
            }
        }
        false
    }

    /// Watchdog recovery: kill the process if it is still around and
    /// charge the failure to the type's retry budget.
    pub async fn release_slot(&self, instance_id: &str) {
        let mut types = self.types.lock().await;
        for ts in types.values_mut() {
            if let Some(mut proc) = ts.processes.remove(instance_id) {
                force_kill(&mut proc);
                let _ = proc.child.wait().await;
                ts.failure_count += 1;
                if ts.failure_count > ts.config.max_retries {
                    ts.quarantined = true;
                } else {
                    ts.retry_at = Some(
                        Utc::now() + chrono::Duration::seconds(ts.config.retry_delay_sec as i64),
                    );
                }
                info!(instance_id, "Slot released after watchdog recovery");
                return;
            }
        }
        debug!(instance_id, "Slot release for unknown instance");
    }

    /// Kill all instances and clear quarantine; the scheduler will route
    /// work and spawning resumes subject to cooldown.
    pub async fn restart_workers(&self) {
        let mut types = self.types.lock().await;
        for ts in types.values_mut() {
            for (_, mut proc) in ts.processes.drain() {
                force_kill(&mut proc);
                let _ = proc.child.wait().await;
            }
            ts.failure_count = 0;
            ts.quarantined = false;
            ts.retry_at = None;
        }
        info!("All workers killed; retry budgets reset");
    }

    /// Live snapshots for `worker_status`.
    pub async fn process_info(&self) -> HashMap<String, ProcessSnapshot> {
        let types = self.types.lock().await;
        types
            .values()
            .flat_map(|ts| ts.processes.values().map(|p| (p.instance_id.clone(), p.snapshot())))
            .collect()
    }

    pub async fn running_workers(&self) -> Vec<String> {
        let types = self.types.lock().await;
        let mut ids: Vec<String> = types
            .values()
            .flat_map(|ts| ts.processes.keys().cloned())
            .collect();
        ids.sort();
        ids
    }

    /// Shutdown: kill every managed process and clean worktrees when
    /// configured to.
    pub async fn kill_all(&self) {
        let mut types = self.types.lock().await;
        for ts in types.values_mut() {
            for (id, mut proc) in ts.processes.drain() {
                graceful_kill(&mut proc);
                match tokio::time::timeout(KILL_GRACE, proc.child.wait()).await {
                    Ok(_) => {}
                    Err(_) => {
                        force_kill(&mut proc);
                        let _ = proc.child.wait().await;
                    }
                }
                debug!(instance_id = %id, "Worker stopped on shutdown");
            }
        }
        drop(types);

        if self.worktrees.enabled() && self.worktrees.cleanup_strategy() != WorktreeCleanup::Never {
            self.worktrees
                .cleanup_all(&self.coordinator.workspace())
                .await;
        }
    }
}

fn graceful_kill(proc: &mut ProcessInfo) {
    if let Some(pid) = proc.pid {
        if let Err(err) = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!(instance_id = %proc.instance_id, error = %err, "SIGTERM failed; falling back to kill");
            let _ = proc.child.start_kill();
        }
    } else {
        let _ = proc.child.start_kill();
    }
}

fn force_kill(proc: &mut ProcessInfo) {
    if let Some(pid) = proc.pid {
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
    let _ = proc.child.start_kill();
}

/// Pump one output stream into the instance's log sink, updating
/// last-output and byte counters on every line.
fn spawn_output_pump(
    stream: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    log_path: PathBuf,
    last_output_at: Arc<StdMutex<DateTime<Utc>>>,
    output_bytes: Arc<AtomicU64>,
) {
    tokio::spawn(async move {
        if let Some(parent) = log_path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let mut sink = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
            .ok();

        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            output_bytes.fetch_add(line.len() as u64 + 1, Ordering::Relaxed);
            if let Ok(mut at) = last_output_at.lock() {
                *at = Utc::now();
            }
            if let Some(sink) = sink.as_mut() {
                let _ = sink.write_all(line.as_bytes()).await;
                let _ = sink.write_all(b"\n").await;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_state(cooldown_sec: u64, instances: u32) -> TypeState {
        TypeState::new(WorkerTypeConfig {
            name: "claude-code".to_string(),
            command: "true".to_string(),
            instances,
            max_tasks: 1,
            capabilities: vec![],
            cooldown_sec,
            timeout_sec: 0,
            max_retries: 3,
            retry_delay_sec: 10,
            starting_window_sec: 120,
            env_inherit: true,
            env_include: vec![],
            env: HashMap::new(),
        })
    }

    #[test]
    fn test_spawn_gate_requires_pending_work() {
        let ts = type_state(30, 1);
        let now = Utc::now();
        assert!(!ts.spawn_eligible(0, false, now));
        assert!(ts.spawn_eligible(2, false, now));
    }

    #[test]
    fn test_spawn_gate_respects_cooldown() {
        let mut ts = type_state(30, 2);
        let now = Utc::now();
        assert!(ts.spawn_eligible(1, false, now));

        ts.last_spawn_at = Some(now - chrono::Duration::seconds(5));
        assert!(!ts.spawn_eligible(1, false, now));

        ts.last_spawn_at = Some(now - chrono::Duration::seconds(31));
        assert!(ts.spawn_eligible(1, false, now));
    }

    #[test]
    fn test_spawn_gate_blocks_on_live_session() {
        let ts = type_state(0, 1);
        assert!(!ts.spawn_eligible(1, true, Utc::now()));
    }

    #[test]
    fn test_spawn_gate_blocks_when_quarantined_or_waiting() {
        let mut ts = type_state(0, 1);
        ts.quarantined = true;
        assert!(!ts.spawn_eligible(1, false, Utc::now()));

        let mut ts = type_state(0, 1);
        ts.retry_at = Some(Utc::now() + chrono::Duration::seconds(10));
        assert!(!ts.spawn_eligible(1, false, Utc::now()));
    }

    #[tokio::test]
    async fn test_instance_id_reuse() {
        let mut ts = type_state(0, 3);
        assert_eq!(ts.next_instance_id(), "claude-code-1");

        // Occupy slot 1; next is 2. Freeing 1 makes it reusable, which is
        // what lets a re-spawn find its old worktree.
        let placeholder = || ProcessInfo {
            instance_id: String::new(),
            started_at: Utc::now(),
            last_output_at: Arc::new(StdMutex::new(Utc::now())),
            output_bytes: Arc::new(AtomicU64::new(0)),
            workspace_dir: PathBuf::new(),
            child: Command::new("true").spawn().unwrap(),
            pid: None,
            has_worktree: false,
            term_sent_at: None,
            connected_once: false,
        };
        ts.processes.insert("claude-code-1".to_string(), placeholder());
        assert_eq!(ts.next_instance_id(), "claude-code-2");

        ts.processes.insert("claude-code-2".to_string(), placeholder());
        ts.processes.remove("claude-code-1");
        assert_eq!(ts.next_instance_id(), "claude-code-1");
    }

    #[tokio::test]
    async fn test_snapshot_reports_counters() {
        let last = Arc::new(StdMutex::new(Utc::now()));
        let bytes = Arc::new(AtomicU64::new(42));
        let proc = ProcessInfo {
            instance_id: "w-1".to_string(),
            started_at: Utc::now(),
            last_output_at: last,
            output_bytes: bytes,
            workspace_dir: PathBuf::from("/proj"),
            child: Command::new("true").spawn().unwrap(),
            pid: None,
            has_worktree: false,
            term_sent_at: None,
            connected_once: false,
        };
        let snap = proc.snapshot();
        assert_eq!(snap.instance_id, "w-1");
        assert_eq!(snap.output_bytes, 42);
        assert_eq!(snap.workspace_dir, "/proj");
    }
}
