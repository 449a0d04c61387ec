//! Coordination service: the single mutation funnel over shared state.
//!
//! Every mutation flows through [`Coordinator::run`]: acquire the
//! exclusive token, load, mutate, prune, save, bump the change signal.
//! Queries load a consistent snapshot without the token and never save.
//! No other component holds a handle to mutable state.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AgentCounts, SharedState};
use crate::domain::ports::StateStore;

use super::change_signal::ChangeSignal;

/// Message pruning knobs, frozen at startup.
#[derive(Debug, Clone, Copy)]
pub struct PruneSettings {
    pub retention_hours: i64,
    pub max_count: usize,
}

impl Default for PruneSettings {
    fn default() -> Self {
        Self {
            retention_hours: 72,
            max_count: 500,
        }
    }
}

pub struct Coordinator {
    store: Arc<dyn StateStore>,
    signal: ChangeSignal,
    token: Mutex<()>,
    prune: PruneSettings,
    /// Authoritative project root; follows the active driver's presence.
    workspace: RwLock<PathBuf>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn StateStore>,
        signal: ChangeSignal,
        prune: PruneSettings,
        initial_workspace: PathBuf,
    ) -> Self {
        Self {
            store,
            signal,
            token: Mutex::new(()),
            prune,
            workspace: RwLock::new(initial_workspace),
        }
    }

    /// Run a mutation under the exclusive serialization token.
    ///
    /// The token is held across the whole load → mutate → save round-trip
    /// so mutations observe a strict total order. Callers must not do
    /// unbounded work inside the closure.
    pub async fn run<T, F>(&self, f: F) -> DomainResult<T>
    where
        F: FnOnce(&mut SharedState) -> DomainResult<T>,
    {
        let _guard = self.token.lock().await;
        let mut state = self.store.load().await?;

        let out = match f(&mut state) {
            Ok(v) => v,
            Err(err) => {
                if err.is_server_fault() {
                    tracing::error!(error = %err, "Mutation failed");
                } else {
                    tracing::info!(error = %err, "Mutation rejected");
                }
                return Err(err);
            }
        };

        state.prune_messages(self.prune.retention_hours, self.prune.max_count);
        self.follow_workspace(&state);

        self.store.save(&state).await?;
        self.signal.bump();
        Ok(out)
    }

    /// Run a read-only query against a consistent snapshot.
    pub async fn query<T, F>(&self, f: F) -> DomainResult<T>
    where
        F: FnOnce(&SharedState) -> T,
    {
        let state = self.store.load().await?;
        Ok(f(&state))
    }

    /// The current workspace root used for path validation and as the cwd
    /// of spawned workers.
    pub fn workspace(&self) -> PathBuf {
        self.workspace
            .read()
            .map(|w| w.clone())
            .unwrap_or_else(|_| PathBuf::from("."))
    }

    /// Revision of the last observed mutation.
    pub fn revision(&self) -> u64 {
        self.signal.current()
    }

    /// Path of the change-signal file (watched by the notifier).
    pub fn signal_path(&self) -> PathBuf {
        self.signal.path().to_path_buf()
    }

    /// Piggyback counts for an agent, from a snapshot.
    pub async fn counts_for(&self, agent: &str) -> DomainResult<AgentCounts> {
        let agent = agent.to_string();
        self.query(move |state| state.agent_counts(&agent)).await
    }

    /// Banner text appended to tool responses, if the agent has anything
    /// waiting. A STOP banner supersedes the unread/pending line.
    pub fn banner(counts: AgentCounts) -> Option<String> {
        if counts.stop_required() {
            return Some(
                "STOP: one or more of your current tasks were cancelled. \
                 Call worker_status and stand down."
                    .to_string(),
            );
        }
        if counts.is_quiet() {
            return None;
        }
        Some(format!(
            "You have {} unread message(s) and {} pending task(s). \
             Call read_messages or claim_next.",
            counts.unread_messages, counts.pending_tasks
        ))
    }

    /// Update the process-wide workspace root from the active driver's
    /// presence, when it names one.
    fn follow_workspace(&self, state: &SharedState) {
        let Some(driver) = state.active_driver.as_deref() else {
            return;
        };
        let Some(workspace) = state
            .presence
            .get(driver)
            .and_then(|p| p.workspace.as_deref())
        else {
            return;
        };
        let new_root = PathBuf::from(workspace);
        if let Ok(mut current) = self.workspace.write() {
            if *current != new_root {
                tracing::info!(workspace = %new_root.display(), "Workspace root updated");
                *current = new_root;
            }
        }
    }

    /// Validate that a path stays inside the current workspace root.
    pub fn validate_path(&self, path: &str) -> DomainResult<()> {
        let p = std::path::Path::new(path);
        if p.components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(DomainError::ValidationFailed(format!(
                "Path {path} escapes the workspace"
            )));
        }
        if p.is_absolute() && !p.starts_with(self.workspace()) {
            return Err(DomainError::ValidationFailed(format!(
                "Path {path} is outside the workspace"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{open_memory_database, SqliteStateStore};
    use crate::domain::models::{Presence, Task};

    async fn coordinator(dir: &std::path::Path) -> Coordinator {
        let pool = open_memory_database().await.unwrap();
        Coordinator::new(
            Arc::new(SqliteStateStore::new(pool)),
            ChangeSignal::new(dir.join("state.signal")),
            PruneSettings::default(),
            PathBuf::from("."),
        )
    }

    #[tokio::test]
    async fn mutation_persists_and_bumps_signal() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path()).await;
        let before = coord.revision();

        let id = coord
            .run(|state| {
                let id = state.alloc_task_id();
                state.tasks.push(Task::new(id, "T1", "cursor"));
                Ok(id)
            })
            .await
            .unwrap();

        assert_eq!(id, 1);
        assert!(coord.revision() > before);
        let count = coord.query(|s| s.tasks.len()).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn failed_mutation_saves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path()).await;
        let before = coord.revision();

        let result: DomainResult<()> = coord
            .run(|state| {
                let id = state.alloc_task_id();
                state.tasks.push(Task::new(id, "doomed", "cursor"));
                Err(DomainError::ValidationFailed("nope".into()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(coord.revision(), before);
        assert_eq!(coord.query(|s| s.tasks.len()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn queries_do_not_bump() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path()).await;
        let before = coord.revision();
        let _ = coord.query(|s| s.tasks.len()).await.unwrap();
        assert_eq!(coord.revision(), before);
    }

    #[tokio::test]
    async fn workspace_follows_driver_presence() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path()).await;

        coord
            .run(|state| {
                state.active_driver = Some("cursor".to_string());
                let mut p = Presence::new("cursor", "active");
                p.workspace = Some("/a".to_string());
                state.presence.insert("cursor".to_string(), p);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(coord.workspace(), PathBuf::from("/a"));

        coord
            .run(|state| {
                if let Some(p) = state.presence.get_mut("cursor") {
                    p.workspace = Some("/b".to_string());
                }
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(coord.workspace(), PathBuf::from("/b"));
    }

    #[tokio::test]
    async fn banner_precedence() {
        let stop = AgentCounts {
            unread_messages: 3,
            pending_tasks: 2,
            cancelled_uninformed: 1,
        };
        assert!(Coordinator::banner(stop).unwrap().starts_with("STOP"));

        let busy = AgentCounts {
            unread_messages: 3,
            pending_tasks: 2,
            cancelled_uninformed: 0,
        };
        assert!(Coordinator::banner(busy).unwrap().contains("3 unread"));

        assert!(Coordinator::banner(AgentCounts::default()).is_none());
    }

    #[tokio::test]
    async fn path_validation() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path()).await;
        assert!(coord.validate_path("src/main.rs").is_ok());
        assert!(coord.validate_path("../outside").is_err());
    }
}
