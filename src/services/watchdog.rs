//! Watchdog: detects silent or overdue workers and recovers.
//!
//! A periodic tick inspects every worker instance's heartbeat age and
//! every in-progress task's SLA. Alerts fire once per rising edge and
//! reset on the next heartbeat; crossing the recovery threshold cancels
//! the instance's tasks, marks it offline, and asks the worker manager to
//! release its slot so the scheduler can reassign.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};

use crate::domain::models::{
    AgentRole, AgentStatus, SharedState, TaskStatus, WatchdogConfig,
};

use super::coordinator::Coordinator;
use super::scheduler::TaskScheduler;

/// Alert escalation per instance, reset by a fresh heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum AlertLevel {
    Quiet,
    Warning,
    Critical,
    Recovered,
}

/// One observed rising edge, applied inside a single mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Edge {
    Warning { instance_id: String, silent_sec: i64 },
    Critical { instance_id: String, silent_sec: i64 },
    Recovery { instance_id: String, silent_sec: i64 },
    SlaOver { task_id: i64 },
}

#[derive(Default)]
struct InstanceTracker {
    heartbeat_seen: Option<DateTime<Utc>>,
    level: AlertLevel,
}

impl Default for AlertLevel {
    fn default() -> Self {
        Self::Quiet
    }
}

pub struct Watchdog {
    config: WatchdogConfig,
    trackers: Mutex<HashMap<String, InstanceTracker>>,
    /// Instance ids whose slot should be released by the worker manager.
    recovery_tx: mpsc::Sender<String>,
}

impl Watchdog {
    pub fn new(config: WatchdogConfig, recovery_tx: mpsc::Sender<String>) -> Self {
        Self {
            config,
            trackers: Mutex::new(HashMap::new()),
            recovery_tx,
        }
    }

    /// Long-lived supervision loop.
    pub async fn run_loop(
        self: Arc<Self>,
        coordinator: Arc<Coordinator>,
        scheduler: Arc<TaskScheduler>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.tick_interval_sec));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            warning_sec = self.config.warning_sec,
            critical_sec = self.config.critical_sec,
            recovery_sec = self.config.recovery_sec,
            "Watchdog started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.recv() => break,
            }

            if let Err(err) = self.tick(&coordinator, &scheduler).await {
                tracing::warn!(error = %err, "Watchdog tick failed");
            }
        }

        tracing::info!("Watchdog stopped");
    }

    /// One supervision pass: plan edges from a snapshot, then apply them
    /// in a single mutation.
    pub async fn tick(
        &self,
        coordinator: &Coordinator,
        scheduler: &TaskScheduler,
    ) -> crate::domain::errors::DomainResult<()> {
        let now = Utc::now();
        let snapshot = coordinator.query(|s| s.clone()).await?;
        let edges = self.plan(&snapshot, now);
        if edges.is_empty() {
            return Ok(());
        }

        let config = self.config.clone();
        let to_apply = edges.clone();
        let recovered: Vec<String> = coordinator
            .run(move |state| Ok(apply_edges(state, &to_apply, &config, now)))
            .await?;

        for instance_id in recovered {
            if self.recovery_tx.send(instance_id).await.is_err() {
                tracing::debug!("Worker manager gone; slot release dropped");
            }
            scheduler.kick();
        }
        Ok(())
    }

    /// Compute rising edges against internal per-instance trackers.
    fn plan(&self, state: &SharedState, now: DateTime<Utc>) -> Vec<Edge> {
        let mut edges = Vec::new();
        let Ok(mut trackers) = self.trackers.lock() else {
            return edges;
        };

        for agent in state.agents.values() {
            if agent.role != AgentRole::Worker {
                continue;
            }
            if matches!(agent.status, AgentStatus::Offline | AgentStatus::Cancelled) {
                trackers.remove(&agent.instance_id);
                continue;
            }

            let tracker = trackers.entry(agent.instance_id.clone()).or_default();

            // A fresh heartbeat resets the escalation state machine.
            if tracker.heartbeat_seen != Some(agent.last_heartbeat) {
                tracker.heartbeat_seen = Some(agent.last_heartbeat);
                tracker.level = AlertLevel::Quiet;
            }

            let silent_sec = (now - agent.last_heartbeat).num_seconds();
            let target = if silent_sec >= self.config.recovery_sec {
                AlertLevel::Recovered
            } else if silent_sec >= self.config.critical_sec {
                AlertLevel::Critical
            } else if silent_sec >= self.config.warning_sec {
                AlertLevel::Warning
            } else {
                AlertLevel::Quiet
            };

            if target > tracker.level {
                let instance_id = agent.instance_id.clone();
                match target {
                    AlertLevel::Warning => edges.push(Edge::Warning { instance_id, silent_sec }),
                    AlertLevel::Critical => edges.push(Edge::Critical { instance_id, silent_sec }),
                    AlertLevel::Recovered => edges.push(Edge::Recovery { instance_id, silent_sec }),
                    AlertLevel::Quiet => {}
                }
                tracker.level = target;
            }
        }

        for task in &state.tasks {
            if task.status != TaskStatus::InProgress || task.sla_over {
                continue;
            }
            let Some(expected) = task.expected_duration_sec.filter(|e| *e > 0) else {
                continue;
            };
            if (now - task.updated_at).num_seconds() > expected {
                edges.push(Edge::SlaOver { task_id: task.id });
            }
        }

        edges
    }
}

/// Apply planned edges to the state. Returns recovered instance ids so
/// the caller can release manager slots.
fn apply_edges(
    state: &mut SharedState,
    edges: &[Edge],
    config: &WatchdogConfig,
    now: DateTime<Utc>,
) -> Vec<String> {
    let driver = state.active_driver.clone();
    let mut recovered = Vec::new();

    for edge in edges {
        match edge {
            Edge::Warning { instance_id, silent_sec } => {
                tracing::warn!(instance_id = %instance_id, silent_sec, "Worker heartbeat overdue");
                if let Some(driver) = &driver {
                    state.push_system_message(
                        driver.clone(),
                        format!(
                            "WARNING: {instance_id} has not heartbeat for {silent_sec}s \
                             (threshold {}s).",
                            config.warning_sec
                        ),
                    );
                }
            }
            Edge::Critical { instance_id, silent_sec } => {
                tracing::error!(instance_id = %instance_id, silent_sec, "Worker heartbeat critically overdue");
                if let Some(driver) = &driver {
                    state.push_system_message(
                        driver.clone(),
                        format!(
                            "CRITICAL: {instance_id} has not heartbeat for {silent_sec}s \
                             (threshold {}s).",
                            config.critical_sec
                        ),
                    );
                }
            }
            Edge::Recovery { instance_id, silent_sec } => {
                let held: Vec<i64> = state
                    .agents
                    .get(instance_id)
                    .map(|a| a.current_tasks.clone())
                    .unwrap_or_default();

                for task_id in &held {
                    if let Some(task) = state.task_mut(*task_id) {
                        if !task.status.is_terminal() {
                            task.status = TaskStatus::Cancelled;
                            task.result_summary = format!(
                                "Cancelled by watchdog: {instance_id} silent for {silent_sec}s"
                            );
                            task.updated_at = now;
                        }
                    }
                    state.release_task(*task_id);
                }

                if let Some(agent) = state.agents.get_mut(instance_id) {
                    agent.status = AgentStatus::Offline;
                    agent.current_tasks.clear();
                }

                tracing::error!(
                    instance_id = %instance_id,
                    cancelled = held.len(),
                    "Worker recovered: tasks cancelled, instance offline"
                );
                if let Some(driver) = &driver {
                    state.push_system_message(
                        driver.clone(),
                        format!(
                            "RECOVERY: {instance_id} silent for {silent_sec}s; \
                             {} task(s) cancelled and the slot released.",
                            held.len()
                        ),
                    );
                }
                recovered.push(instance_id.clone());
            }
            Edge::SlaOver { task_id } => {
                // Re-check against current state: the task may have moved
                // since the snapshot.
                let Some(task) = state.task_mut(*task_id) else {
                    continue;
                };
                if task.status != TaskStatus::InProgress || task.sla_over {
                    continue;
                }
                task.sla_over = true;
                let title = task.title.clone();
                let expected = task.expected_duration_sec.unwrap_or(0);
                tracing::warn!(task_id, expected_sec = expected, "Task exceeded its SLA");
                if let Some(driver) = &driver {
                    state.push_system_message(
                        driver.clone(),
                        format!(
                            "SLA: task #{task_id} '{title}' exceeded its expected \
                             duration of {expected}s and is still in progress."
                        ),
                    );
                }
            }
        }
    }

    recovered
}
