//! Agent domain model.
//!
//! An agent instance is a specific running identity within an agent type
//! (e.g. `claude-code-1`) and is the unit of supervision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of an agent within the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Interactive agent that creates tasks and monitors workers
    Driver,
    /// Autonomous agent spawned and supervised by the server
    Worker,
}

impl Default for AgentRole {
    fn default() -> Self {
        Self::Worker
    }
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Driver => "driver",
            Self::Worker => "worker",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "driver" => Some(Self::Driver),
            "worker" => Some(Self::Worker),
            _ => None,
        }
    }
}

/// Liveness status of an agent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// No live process or session
    Offline,
    /// Connected with spare task capacity
    Idle,
    /// Connected and at or near capacity
    Busy,
    /// Process spawned, session not yet established
    Starting,
    /// Cancelled by the driver; process being torn down
    Cancelled,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::Offline
    }
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Starting => "starting",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "offline" => Some(Self::Offline),
            "idle" => Some(Self::Idle),
            "busy" => Some(Self::Busy),
            "starting" => Some(Self::Starting),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether this instance counts toward a worker type's live load.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Idle | Self::Busy | Self::Starting)
    }
}

/// A specific running identity within an agent type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInstance {
    /// Unique id, e.g. "claude-code-1"
    pub instance_id: String,
    /// Worker type this instance belongs to, e.g. "claude-code"
    pub agent_type: String,
    /// Driver or worker
    pub role: AgentRole,
    /// Capabilities offered by this instance
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Maximum concurrent tasks (>= 1)
    pub max_tasks: u32,
    /// Liveness status
    pub status: AgentStatus,
    /// Tasks currently held; `len <= max_tasks`
    #[serde(default)]
    pub current_tasks: Vec<i64>,
    /// Last heartbeat received
    pub last_heartbeat: DateTime<Utc>,
    /// Free-form progress line from the latest heartbeat
    #[serde(default)]
    pub progress: String,
    /// Current step number, when the agent reports one
    #[serde(default)]
    pub step: Option<u32>,
    /// Total steps, when the agent reports them
    #[serde(default)]
    pub total_steps: Option<u32>,
    /// When progress fields last changed
    #[serde(default)]
    pub progress_updated_at: Option<DateTime<Utc>>,
}

impl AgentInstance {
    pub fn new(instance_id: impl Into<String>, agent_type: impl Into<String>, role: AgentRole) -> Self {
        Self {
            instance_id: instance_id.into(),
            agent_type: agent_type.into(),
            role,
            capabilities: Vec::new(),
            max_tasks: 1,
            status: AgentStatus::Offline,
            current_tasks: Vec::new(),
            last_heartbeat: Utc::now(),
            progress: String::new(),
            step: None,
            total_steps: None,
            progress_updated_at: None,
        }
    }

    /// Whether the instance can accept another task.
    pub fn has_capacity(&self) -> bool {
        (self.current_tasks.len() as u32) < self.max_tasks
    }

    /// Record a heartbeat, optionally with progress fields.
    pub fn heartbeat(&mut self, progress: Option<String>, step: Option<u32>, total_steps: Option<u32>) {
        let now = Utc::now();
        self.last_heartbeat = now;
        if progress.is_some() || step.is_some() || total_steps.is_some() {
            if let Some(p) = progress {
                self.progress = p;
            }
            self.step = step.or(self.step);
            self.total_steps = total_steps.or(self.total_steps);
            self.progress_updated_at = Some(now);
        }
        if self.status == AgentStatus::Offline || self.status == AgentStatus::Starting {
            self.status = if self.current_tasks.is_empty() {
                AgentStatus::Idle
            } else {
                AgentStatus::Busy
            };
        }
    }

    /// Recompute idle/busy from current task load. Leaves other statuses alone.
    pub fn refresh_load_status(&mut self) {
        if matches!(self.status, AgentStatus::Idle | AgentStatus::Busy) {
            self.status = if self.current_tasks.is_empty() {
                AgentStatus::Idle
            } else {
                AgentStatus::Busy
            };
        }
    }
}

/// A custom agent type registered through the RPC surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredAgent {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub registered_at: DateTime<Utc>,
}

impl RegisteredAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: String::new(),
            capabilities: Vec::new(),
            registered_at: Utc::now(),
        }
    }
}
