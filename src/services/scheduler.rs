//! Task scheduler: routes unassigned pending tasks to worker types.
//!
//! Assignment is routing only — the task's `assigned_to` becomes the
//! worker *type* and the status stays pending until a concrete instance
//! claims it through `claim_next`. The worker manager reacts to routed
//! pending work by spawning instances.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Notify};

use crate::domain::models::{AssignmentStrategy, SharedState, Task, WorkerTypeConfig};

use super::coordinator::Coordinator;

pub struct TaskScheduler {
    strategy: AssignmentStrategy,
    workers: Vec<WorkerTypeConfig>,
    tick_interval: Duration,
    /// Round-robin bookkeeping: when each type last received a task.
    last_assigned: Mutex<HashMap<String, DateTime<Utc>>>,
    /// Tasks currently logged as unmatchable; cleared when they route.
    unmatched: Mutex<HashSet<i64>>,
    kick: Notify,
}

impl TaskScheduler {
    pub fn new(
        strategy: AssignmentStrategy,
        workers: Vec<WorkerTypeConfig>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            strategy,
            workers,
            tick_interval,
            last_assigned: Mutex::new(HashMap::new()),
            unmatched: Mutex::new(HashSet::new()),
            kick: Notify::new(),
        }
    }

    /// Wake the scheduling loop immediately (called after mutations that
    /// create or free tasks, and by the watchdog on recovery).
    pub fn kick(&self) {
        self.kick.notify_one();
    }

    /// Long-lived scheduling loop: tick on a timer and on kicks until
    /// shutdown.
    pub async fn run_loop(
        self: Arc<Self>,
        coordinator: Arc<Coordinator>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(strategy = self.strategy.as_str(), "Task scheduler started");

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.kick.notified() => {}
                _ = shutdown.recv() => break,
            }

            let this = self.clone();
            let result = coordinator.run(move |state| Ok(this.tick(state))).await;
            match result {
                Ok(0) => {}
                Ok(n) => tracing::debug!(assigned = n, "Scheduler routed tasks"),
                Err(err) => tracing::warn!(error = %err, "Scheduler tick failed"),
            }
        }

        tracing::info!("Task scheduler stopped");
    }

    /// Route every eligible unassigned task; returns how many were
    /// assigned. Safe to call from inside a coordinator mutation.
    pub fn tick(&self, state: &mut SharedState) -> usize {
        let mut eligible: Vec<i64> = state
            .tasks
            .iter()
            .filter(|t| t.is_unrouted())
            .filter(|t| state.dependencies_met(t))
            .map(|t| t.id)
            .collect();

        // Priority first (lower = earlier), then id for determinism.
        eligible.sort_by_key(|id| {
            state
                .task(*id)
                .map(|t| (t.priority, t.id))
                .unwrap_or((u8::MAX, *id))
        });

        let mut assigned = 0;
        for task_id in eligible {
            let Some(task) = state.task(task_id).cloned() else {
                continue;
            };
            match self.pick_type(state, &task) {
                Some(worker_type) => {
                    if let Some(t) = state.task_mut(task_id) {
                        t.assigned_to = worker_type.clone();
                        t.updated_at = Utc::now();
                    }
                    if self.strategy == AssignmentStrategy::RoundRobin {
                        if let Ok(mut last) = self.last_assigned.lock() {
                            last.insert(worker_type.clone(), Utc::now());
                        }
                    }
                    self.clear_unmatched(task_id);
                    tracing::debug!(task_id, worker_type = %worker_type, "Task routed");
                    assigned += 1;
                }
                None => self.note_unmatched(state, &task),
            }
        }
        assigned
    }

    /// Candidate worker types for a task: an explicit `worker_type`
    /// restriction narrows the set; capability requirements only apply
    /// under `capability_match`.
    fn pick_type(&self, state: &SharedState, task: &Task) -> Option<String> {
        let candidates: Vec<&WorkerTypeConfig> = self
            .workers
            .iter()
            .filter(|w| {
                task.worker_type
                    .as_deref()
                    .map(|ty| ty == w.name)
                    .unwrap_or(true)
            })
            .filter(|w| match self.strategy {
                AssignmentStrategy::CapabilityMatch => task
                    .capabilities
                    .iter()
                    .all(|cap| w.capabilities.contains(cap)),
                _ => true,
            })
            .collect();

        if candidates.is_empty() {
            return None;
        }

        match self.strategy {
            AssignmentStrategy::LeastLoaded | AssignmentStrategy::CapabilityMatch => {
                self.least_loaded(state, &candidates)
            }
            AssignmentStrategy::RoundRobin => {
                let last = self.last_assigned.lock().ok()?;
                candidates
                    .iter()
                    .min_by_key(|w| {
                        (
                            last.get(&w.name)
                                .copied()
                                .unwrap_or(DateTime::<Utc>::MIN_UTC),
                            w.name.clone(),
                        )
                    })
                    .map(|w| w.name.clone())
            }
        }
    }

    fn least_loaded(&self, state: &SharedState, candidates: &[&WorkerTypeConfig]) -> Option<String> {
        candidates
            .iter()
            .min_by_key(|w| {
                let current = state.type_load(&w.name);
                let queued = state.pending_for_type(&w.name).len();
                // Tie-break by name order for determinism.
                (current + queued, w.name.clone())
            })
            .map(|w| w.name.clone())
    }

    /// Log (and notify the driver) once per rising edge when no type can
    /// take a task under capability_match.
    fn note_unmatched(&self, state: &mut SharedState, task: &Task) {
        let newly = self
            .unmatched
            .lock()
            .map(|mut set| set.insert(task.id))
            .unwrap_or(false);
        if !newly {
            return;
        }
        tracing::warn!(
            task_id = task.id,
            capabilities = ?task.capabilities,
            "No worker type matches task requirements; leaving pending"
        );
        if let Some(driver) = state.active_driver.clone() {
            state.push_system_message(
                driver,
                format!(
                    "Task #{} '{}' cannot be routed: no worker type offers {:?}.",
                    task.id, task.title, task.capabilities
                ),
            );
        }
    }

    fn clear_unmatched(&self, task_id: i64) {
        if let Ok(mut set) = self.unmatched.lock() {
            set.remove(&task_id);
        }
    }
}
