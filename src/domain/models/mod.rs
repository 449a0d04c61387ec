//! Domain models
//!
//! Pure domain entities with business logic and validation rules.
//! These models are framework-agnostic and contain no infrastructure concerns.

pub mod agent;
pub mod collab;
pub mod config;
pub mod message;
pub mod presence;
pub mod state;
pub mod task;

pub use agent::{AgentInstance, AgentRole, AgentStatus, RegisteredAgent};
pub use collab::{FileLock, Plan, PlanItem, PlanItemStatus, SessionNote, WorkContext};
pub use config::{
    AssignmentStrategy, AutoRespondConfig, Config, DatabaseConfig, LoggingConfig,
    NotifierConfig, SchedulerConfig, ServerConfig, WatchdogConfig, WorkerTypeConfig,
    WorktreeCleanup, WorktreeConfig,
};
pub use message::Message;
pub use presence::Presence;
pub use state::{AgentCounts, SharedState};
pub use task::{Task, TaskStatus};
