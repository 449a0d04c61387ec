//! Collaboration entities external to the orchestration core.
//!
//! Plans, notes, file locks, and work contexts are pure CRUD over the
//! shared state; they participate in the core only through the per-agent
//! piggyback counts.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Status of a single plan item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanItemStatus {
    Todo,
    Doing,
    Done,
    Skipped,
}

impl Default for PlanItemStatus {
    fn default() -> Self {
        Self::Todo
    }
}

impl PlanItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Doing => "doing",
            Self::Done => "done",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "todo" => Some(Self::Todo),
            "doing" => Some(Self::Doing),
            "done" => Some(Self::Done),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

/// One step of a shared plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItem {
    pub text: String,
    #[serde(default)]
    pub status: PlanItemStatus,
    #[serde(default)]
    pub assignee: String,
}

/// A shared plan created by the driver and visible to all agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: i64,
    pub title: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub items: Vec<PlanItem>,
}

impl Plan {
    pub fn new(id: i64, title: impl Into<String>, created_by: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: title.into(),
            created_by: created_by.into(),
            created_at: now,
            updated_at: now,
            items: Vec::new(),
        }
    }
}

/// A free-form session note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionNote {
    pub id: i64,
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// An advisory lock on a workspace file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileLock {
    pub path: String,
    pub held_by: String,
    #[serde(default)]
    pub purpose: String,
    pub acquired_at: DateTime<Utc>,
}

impl FileLock {
    /// Locks older than this are considered abandoned.
    pub const STALE_AFTER_MINUTES: i64 = 30;

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.acquired_at > Duration::minutes(Self::STALE_AFTER_MINUTES)
    }
}

/// The shared "what are we doing right now" document, one per agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkContext {
    pub agent: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub current_focus: String,
    #[serde(default)]
    pub open_questions: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl WorkContext {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            summary: String::new(),
            current_focus: String::new(),
            open_questions: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}
