//! Notifier: turns state changes into pushes and wake-ups.
//!
//! Watches the change-signal file (debounced) with an interval fallback
//! that guarantees forward progress across filesystem quirks. On each
//! wake it pushes `pair_update` notifications to connected sessions whose
//! counts changed, and spawns wake commands for configured offline agents
//! that have unread content.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::{Event as NotifyEvent, EventKind, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};

use crate::domain::models::{AgentCounts, AutoRespondConfig, NotifierConfig};

use super::coordinator::Coordinator;
use super::session_registry::{PairUpdate, SessionRegistry};

/// Wake lockfiles older than this are considered stale and broken.
const WAKE_LOCK_STALE: Duration = Duration::from_secs(300);

pub struct Notifier {
    config: NotifierConfig,
    auto_respond: Vec<AutoRespondConfig>,
    /// Directory holding auto-spawn lockfiles (shared across processes).
    lock_dir: PathBuf,
    /// Last counts pushed per agent; a push is sent only on change.
    last_pushed: Mutex<HashMap<String, AgentCounts>>,
    /// Last wake-up per agent for cooldown enforcement.
    last_wake: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Notifier {
    pub fn new(
        config: NotifierConfig,
        auto_respond: Vec<AutoRespondConfig>,
        lock_dir: PathBuf,
    ) -> Self {
        Self {
            config,
            auto_respond,
            lock_dir,
            last_pushed: Mutex::new(HashMap::new()),
            last_wake: Mutex::new(HashMap::new()),
        }
    }

    /// Long-lived notification loop. Returns when the shutdown channel
    /// fires; the watcher is closed on drop.
    pub async fn run_loop(
        self: Arc<Self>,
        coordinator: Arc<Coordinator>,
        registry: Arc<SessionRegistry>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let signal_path = coordinator.signal_path();
        let (tx, mut rx) = mpsc::channel::<()>(16);

        let watched = signal_path.clone();
        let watcher = notify::recommended_watcher(move |res: Result<NotifyEvent, _>| {
            if let Ok(event) = res {
                let relevant = matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                    && event.paths.iter().any(|p| p.ends_with(
                        watched.file_name().unwrap_or_default(),
                    ));
                if relevant {
                    let _ = tx.blocking_send(());
                }
            }
        });

        let mut _watcher = match watcher {
            Ok(w) => Some(w),
            Err(err) => {
                tracing::warn!(error = %err, "Signal watcher unavailable; relying on fallback poll");
                None
            }
        };
        if let Some(w) = _watcher.as_mut() {
            let dir = signal_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            let _ = std::fs::create_dir_all(&dir);
            if let Err(err) = w.watch(&dir, RecursiveMode::NonRecursive) {
                tracing::warn!(error = %err, "Cannot watch signal directory; relying on fallback poll");
                _watcher = None;
            }
        }

        let mut fallback =
            tokio::time::interval(Duration::from_secs(self.config.fallback_poll_sec.max(1)));
        fallback.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(signal = %signal_path.display(), "Notifier started");

        loop {
            tokio::select! {
                changed = rx.recv() => {
                    if changed.is_none() {
                        // Watcher thread went away; the fallback keeps us alive.
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                    // Debounce: absorb the burst of events a save produces.
                    tokio::time::sleep(Duration::from_millis(self.config.debounce_ms)).await;
                    while rx.try_recv().is_ok() {}
                }
                _ = fallback.tick() => {}
                _ = shutdown.recv() => break,
            }

            self.push_updates(&coordinator, &registry).await;
            self.auto_spawn_wakeups(&coordinator, &registry).await;
        }

        tracing::info!("Notifier stopped");
    }

    /// Push `pair_update` to every connected session whose counts changed
    /// since the last successful push.
    pub async fn push_updates(&self, coordinator: &Coordinator, registry: &SessionRegistry) {
        let agents = registry.connected_agents();
        if agents.is_empty() {
            return;
        }

        let counts: Vec<(String, AgentCounts)> = match coordinator
            .query(move |state| {
                agents
                    .into_iter()
                    .map(|a| {
                        let c = state.agent_counts(&a);
                        (a, c)
                    })
                    .collect()
            })
            .await
        {
            Ok(c) => c,
            Err(err) => {
                tracing::warn!(error = %err, "Notifier snapshot failed");
                return;
            }
        };

        for (agent, current) in counts {
            let unchanged = self
                .last_pushed
                .lock()
                .map(|m| m.get(&agent) == Some(&current))
                .unwrap_or(false);
            if unchanged {
                continue;
            }

            let update = PairUpdate {
                unread_messages: current.unread_messages,
                pending_tasks: current.pending_tasks,
                summary: summarize(&current),
            };
            if registry.push_to_agent(&agent, update) {
                if let Ok(mut m) = self.last_pushed.lock() {
                    m.insert(agent, current);
                }
            }
            // Dropped pushes leave last_pushed stale on purpose: the next
            // wake retries with coalesced state.
        }
    }

    /// Spawn wake commands for configured agents that are offline and
    /// have unread content, subject to cooldown and a cross-process
    /// lockfile.
    pub async fn auto_spawn_wakeups(&self, coordinator: &Coordinator, registry: &SessionRegistry) {
        for entry in &self.auto_respond {
            if registry.has_active_session(&entry.agent) {
                continue;
            }

            let agent = entry.agent.clone();
            let counts = match coordinator.query(move |s| s.agent_counts(&agent)).await {
                Ok(c) => c,
                Err(_) => continue,
            };
            if counts.unread_messages == 0 && counts.cancelled_uninformed == 0 {
                continue;
            }

            let now = Utc::now();
            let cooled = self
                .last_wake
                .lock()
                .map(|m| {
                    m.get(&entry.agent)
                        .map(|at| (now - *at).num_seconds() >= entry.cooldown_sec as i64)
                        .unwrap_or(true)
                })
                .unwrap_or(false);
            if !cooled {
                continue;
            }

            let Some(_lock) = WakeLock::acquire(&self.lock_dir, &entry.agent) else {
                continue;
            };

            tracing::info!(agent = %entry.agent, "Waking offline agent");
            match tokio::process::Command::new("sh")
                .arg("-c")
                .arg(&entry.command)
                .env("AGENT", &entry.agent)
                .spawn()
            {
                Ok(mut child) => {
                    if let Ok(mut m) = self.last_wake.lock() {
                        m.insert(entry.agent.clone(), now);
                    }
                    let lock = _lock;
                    tokio::spawn(async move {
                        let _ = child.wait().await;
                        drop(lock);
                    });
                }
                Err(err) => {
                    tracing::warn!(agent = %entry.agent, error = %err, "Wake command failed to start");
                }
            }
        }
    }
}

fn summarize(counts: &AgentCounts) -> String {
    if counts.stop_required() {
        return "STOP: a current task was cancelled".to_string();
    }
    format!(
        "{} unread message(s), {} pending task(s)",
        counts.unread_messages, counts.pending_tasks
    )
}

/// A cross-process wake lock: atomic create, removed on drop, broken
/// when stale.
struct WakeLock {
    path: PathBuf,
}

impl WakeLock {
    fn acquire(dir: &Path, agent: &str) -> Option<Self> {
        let _ = std::fs::create_dir_all(dir);
        let path = dir.join(format!("wake-{agent}.lock"));

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                use std::io::Write;
                let _ = writeln!(file, "{} {}", std::process::id(), Utc::now().to_rfc3339());
                Some(Self { path })
            }
            Err(_) => {
                // Lock exists: break it only if stale.
                let stale = std::fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| t.elapsed().ok())
                    .map(|age| age > WAKE_LOCK_STALE)
                    .unwrap_or(false);
                if stale {
                    tracing::warn!(path = %path.display(), "Breaking stale wake lock");
                    let _ = std::fs::remove_file(&path);
                    return Self::acquire_once(dir, agent);
                }
                None
            }
        }
    }

    fn acquire_once(dir: &Path, agent: &str) -> Option<Self> {
        let path = dir.join(format!("wake-{agent}.lock"));
        std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .ok()
            .map(|_| Self { path })
    }
}

impl Drop for WakeLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wake_lock_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let first = WakeLock::acquire(dir.path(), "cursor");
        assert!(first.is_some());
        // Second acquisition fails while the lock is held and fresh.
        assert!(WakeLock::acquire(dir.path(), "cursor").is_none());

        drop(first);
        assert!(WakeLock::acquire(dir.path(), "cursor").is_some());
    }

    #[test]
    fn test_wake_lock_per_agent() {
        let dir = tempfile::tempdir().unwrap();
        let _a = WakeLock::acquire(dir.path(), "cursor").unwrap();
        assert!(WakeLock::acquire(dir.path(), "other").is_some());
    }

    #[test]
    fn test_summary_text() {
        let quiet = AgentCounts::default();
        assert_eq!(summarize(&quiet), "0 unread message(s), 0 pending task(s)");

        let stop = AgentCounts {
            unread_messages: 0,
            pending_tasks: 0,
            cancelled_uninformed: 2,
        };
        assert!(summarize(&stop).starts_with("STOP"));
    }
}
