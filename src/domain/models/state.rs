//! The shared state aggregate.
//!
//! One logical value holding every collaboration collection plus the
//! next-id counters and the active driver. The state store persists it
//! wholesale; the coordinator is the only mutator.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::agent::{AgentInstance, RegisteredAgent};
use super::collab::{FileLock, Plan, SessionNote, WorkContext};
use super::message::Message;
use super::presence::Presence;
use super::task::{Task, TaskStatus};

/// Per-agent counts driving piggyback banners and push notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCounts {
    pub unread_messages: usize,
    pub pending_tasks: usize,
    /// Cancelled tasks still listed in the agent's current set, i.e. the
    /// agent has not yet observed the cancellation.
    pub cancelled_uninformed: usize,
}

impl AgentCounts {
    /// Whether a STOP banner supersedes the unread/pending banner.
    pub fn stop_required(&self) -> bool {
        self.cancelled_uninformed > 0
    }

    pub fn is_quiet(&self) -> bool {
        self.unread_messages == 0 && self.pending_tasks == 0 && self.cancelled_uninformed == 0
    }
}

/// Authoritative aggregate of all collaboration entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedState {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub agents: HashMap<String, AgentInstance>,
    #[serde(default)]
    pub presence: HashMap<String, Presence>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub plans: Vec<Plan>,
    #[serde(default)]
    pub notes: Vec<SessionNote>,
    #[serde(default)]
    pub file_locks: Vec<FileLock>,
    #[serde(default)]
    pub work_contexts: HashMap<String, WorkContext>,
    #[serde(default)]
    pub registered_agents: HashMap<String, RegisteredAgent>,

    pub next_message_id: i64,
    pub next_task_id: i64,
    pub next_note_id: i64,

    #[serde(default)]
    pub active_driver: Option<String>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            agents: HashMap::new(),
            presence: HashMap::new(),
            messages: Vec::new(),
            plans: Vec::new(),
            notes: Vec::new(),
            file_locks: Vec::new(),
            work_contexts: HashMap::new(),
            registered_agents: HashMap::new(),
            next_message_id: 1,
            next_task_id: 1,
            next_note_id: 1,
            active_driver: None,
        }
    }
}

impl SharedState {
    /// Self-heal the next-id counters against the ids actually present.
    ///
    /// Stored counters are advisory; after load each counter is forced to
    /// `max(stored, max(existing ids) + 1, 1)`. Counters never decrease
    /// and entity ids are never touched.
    pub fn normalize(&mut self) {
        let max_task = self.tasks.iter().map(|t| t.id).max().unwrap_or(0);
        let max_message = self.messages.iter().map(|m| m.id).max().unwrap_or(0);
        let max_note = self.notes.iter().map(|n| n.id).max().unwrap_or(0);

        self.next_task_id = self.next_task_id.max(max_task + 1).max(1);
        self.next_message_id = self.next_message_id.max(max_message + 1).max(1);
        self.next_note_id = self.next_note_id.max(max_note + 1).max(1);
    }

    /// Allocate the next task id.
    pub fn alloc_task_id(&mut self) -> i64 {
        let id = self.next_task_id;
        self.next_task_id += 1;
        id
    }

    /// Allocate the next message id.
    pub fn alloc_message_id(&mut self) -> i64 {
        let id = self.next_message_id;
        self.next_message_id += 1;
        id
    }

    /// Allocate the next note id.
    pub fn alloc_note_id(&mut self) -> i64 {
        let id = self.next_note_id;
        self.next_note_id += 1;
        id
    }

    pub fn task(&self, id: i64) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: i64) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Append a server-synthesized message and return its id.
    pub fn push_system_message(&mut self, to: impl Into<String>, content: impl Into<String>) -> i64 {
        let id = self.alloc_message_id();
        self.messages.push(Message::system(id, to, content));
        id
    }

    /// Whether every dependency of the task is completed.
    pub fn dependencies_met(&self, task: &Task) -> bool {
        task.dependencies.iter().all(|dep| {
            self.task(*dep)
                .map(|t| t.status == TaskStatus::Completed)
                .unwrap_or(false)
        })
    }

    /// The instance currently holding a task, if any.
    pub fn holder_of(&self, task_id: i64) -> Option<&AgentInstance> {
        self.agents
            .values()
            .find(|a| a.current_tasks.contains(&task_id))
    }

    /// Remove a task from whichever instance holds it.
    pub fn release_task(&mut self, task_id: i64) {
        for agent in self.agents.values_mut() {
            agent.current_tasks.retain(|id| *id != task_id);
            agent.refresh_load_status();
        }
    }

    /// Pending tasks assigned to a worker type (or unrouted), eligible for
    /// claiming: dependencies met and not held by any instance.
    pub fn pending_for_type(&self, worker_type: &str) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| t.assigned_to == worker_type)
            .filter(|t| self.dependencies_met(t))
            .filter(|t| self.holder_of(t.id).is_none())
            .collect()
    }

    /// Current load on a worker type: tasks held by its live instances.
    pub fn type_load(&self, worker_type: &str) -> usize {
        self.agents
            .values()
            .filter(|a| a.agent_type == worker_type && a.status.is_live())
            .map(|a| a.current_tasks.len())
            .sum()
    }

    /// Per-agent counts for piggyback banners and pushes.
    ///
    /// Pending counts cover tasks addressed to the agent directly, to its
    /// type, or to "any" (drivers only see direct assignments).
    pub fn agent_counts(&self, agent: &str) -> AgentCounts {
        let unread_messages = self
            .messages
            .iter()
            .filter(|m| !m.read && m.addressed_to(agent) && m.from != agent)
            .count();

        let agent_type = self.agents.get(agent).map(|a| a.agent_type.as_str());
        let pending_tasks = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| {
                t.assigned_to == agent
                    || t.assigned_to == super::task::ASSIGNEE_ANY
                    || agent_type.is_some_and(|ty| t.assigned_to == ty)
            })
            .count();

        let cancelled_uninformed = self
            .agents
            .get(agent)
            .map(|a| {
                a.current_tasks
                    .iter()
                    .filter(|id| {
                        self.task(**id)
                            .is_some_and(|t| t.status == TaskStatus::Cancelled && !t.cancel_seen)
                    })
                    .count()
            })
            .unwrap_or(0);

        AgentCounts {
            unread_messages,
            pending_tasks,
            cancelled_uninformed,
        }
    }

    /// Drop stale messages: anything older than the retention age, then
    /// oldest-first beyond the max count. Read messages go before unread.
    pub fn prune_messages(&mut self, retention_hours: i64, max_count: usize) {
        let cutoff = Utc::now() - chrono::Duration::hours(retention_hours);
        self.messages.retain(|m| m.timestamp >= cutoff);

        if self.messages.len() > max_count {
            let mut excess = self.messages.len() - max_count;
            // First pass: drop oldest read messages.
            let mut keep = Vec::with_capacity(self.messages.len());
            for m in self.messages.drain(..) {
                if excess > 0 && m.read {
                    excess -= 1;
                } else {
                    keep.push(m);
                }
            }
            // Second pass: still over budget, drop oldest unread.
            if excess > 0 {
                keep.drain(..excess.min(keep.len()));
            }
            self.messages = keep;
        }
    }
}
