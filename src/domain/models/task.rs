//! Task domain model.
//!
//! Tasks are discrete units of work dispatched to worker agents.
//! Ids are small monotonic integers assigned by the shared state and
//! never reused.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Assignee value meaning "unassigned but available to any worker".
pub const ASSIGNEE_ANY: &str = "any";

/// Status of a task in the coordination pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is waiting to be claimed by a worker
    Pending,
    /// Task is being executed by exactly one agent instance
    InProgress,
    /// Task finished successfully
    Completed,
    /// Task is blocked on something outside the queue
    Blocked,
    /// Task was cancelled
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" | "in-progress" => Some(Self::InProgress),
            "completed" | "complete" => Some(Self::Completed),
            "blocked" => Some(Self::Blocked),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal statuses are absorbing: no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::InProgress, Self::Blocked, Self::Cancelled],
            Self::InProgress => &[Self::Completed, Self::Blocked, Self::Pending, Self::Cancelled],
            Self::Blocked => &[Self::Pending, Self::InProgress, Self::Cancelled],
            Self::Completed => &[],
            Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// A discrete unit of work dispatched to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique monotonic identifier, never reused
    pub id: i64,
    /// Human-readable title
    pub title: String,
    /// Detailed description of the work
    #[serde(default)]
    pub description: String,
    /// Current status
    pub status: TaskStatus,
    /// Agent instance id, [`ASSIGNEE_ANY`], a worker type name, or ""
    pub assigned_to: String,
    /// Agent that created the task
    pub created_by: String,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated (any field)
    pub updated_at: DateTime<Utc>,
    /// Priority 1..5, lower is more urgent
    pub priority: u8,
    /// Expected duration in seconds for SLA supervision
    #[serde(default)]
    pub expected_duration_sec: Option<i64>,
    /// Latest human-readable progress report
    #[serde(default)]
    pub progress_description: String,
    /// Latest reported completion percentage, 0..100
    #[serde(default)]
    pub progress_percent: u8,
    /// When progress was last reported
    #[serde(default)]
    pub last_progress_at: Option<DateTime<Utc>>,
    /// Worker-estimated seconds to completion
    #[serde(default)]
    pub eta_seconds: Option<i64>,
    /// Summary written on completion or cancellation
    #[serde(default)]
    pub result_summary: String,
    /// Task ids that must be completed before this one is eligible
    #[serde(default)]
    pub dependencies: Vec<i64>,
    /// Reason the task is blocked, when status is Blocked
    #[serde(default)]
    pub blocked_by: Option<String>,
    /// Worker type this task requires, when restricted
    #[serde(default)]
    pub worker_type: Option<String>,
    /// Capabilities a claiming worker must provide
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Files the task is expected to touch
    #[serde(default)]
    pub relevant_files: Vec<String>,
    /// Background context handed to the worker
    #[serde(default)]
    pub background: String,
    /// Constraints the worker must honor
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Set once the watchdog observes the task exceeding its SLA
    #[serde(default)]
    pub sla_over: bool,
    /// Whether the assignee has observed a cancellation (STOP banner shown)
    #[serde(default)]
    pub cancel_seen: bool,
}

impl Task {
    /// Create a new pending task. The id is assigned by the aggregate.
    pub fn new(id: i64, title: impl Into<String>, created_by: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: title.into(),
            description: String::new(),
            status: TaskStatus::Pending,
            assigned_to: String::new(),
            created_by: created_by.into(),
            created_at: now,
            updated_at: now,
            priority: 3,
            expected_duration_sec: None,
            progress_description: String::new(),
            progress_percent: 0,
            last_progress_at: None,
            eta_seconds: None,
            result_summary: String::new(),
            dependencies: Vec::new(),
            blocked_by: None,
            worker_type: None,
            capabilities: Vec::new(),
            relevant_files: Vec::new(),
            background: String::new(),
            constraints: Vec::new(),
            sla_over: false,
            cancel_seen: false,
        }
    }

    /// Set the assignee (instance id, worker type, or "any").
    pub fn with_assignee(mut self, assigned_to: impl Into<String>) -> Self {
        self.assigned_to = assigned_to.into();
        self
    }

    /// Set priority, clamped to 1..=5.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 5);
        self
    }

    /// Add a dependency.
    pub fn with_dependency(mut self, task_id: i64) -> Self {
        if !self.dependencies.contains(&task_id) && task_id != self.id {
            self.dependencies.push(task_id);
        }
        self
    }

    /// Set the expected duration for SLA supervision.
    pub fn with_expected_duration(mut self, secs: i64) -> Self {
        self.expected_duration_sec = Some(secs);
        self
    }

    /// Whether the task counts as unassigned-but-available for scheduling.
    pub fn is_unrouted(&self) -> bool {
        self.status == TaskStatus::Pending
            && (self.assigned_to.is_empty() || self.assigned_to == ASSIGNEE_ANY)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn can_transition_to(&self, new_status: TaskStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    /// Transition to a new status, enforcing the state machine.
    pub fn transition_to(&mut self, new_status: TaskStatus) -> Result<(), String> {
        if !self.can_transition_to(new_status) {
            return Err(format!(
                "Cannot transition from {} to {}",
                self.status.as_str(),
                new_status.as_str()
            ));
        }
        self.status = new_status;
        self.updated_at = Utc::now();
        if new_status != TaskStatus::Blocked {
            self.blocked_by = None;
        }
        Ok(())
    }

    /// Validate task fields.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("Task title cannot be empty".to_string());
        }
        if !(1..=5).contains(&self.priority) {
            return Err(format!("Task priority {} outside 1..=5", self.priority));
        }
        if self.progress_percent > 100 {
            return Err(format!(
                "Task progress {}% outside 0..=100",
                self.progress_percent
            ));
        }
        if self.dependencies.contains(&self.id) {
            return Err("Task cannot depend on itself".to_string());
        }
        Ok(())
    }
}
