//! Presence domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Presence record for an agent, keyed by agent name in the aggregate.
///
/// The workspace of the connected driver is the authoritative project
/// root; presence updates carrying a workspace path feed the
/// process-wide workspace follow in the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    pub agent: String,
    pub status: String,
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default)]
    pub note: String,
    pub last_seen: DateTime<Utc>,
}

impl Presence {
    pub fn new(agent: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            status: status.into(),
            workspace: None,
            note: String::new(),
            last_seen: Utc::now(),
        }
    }
}
