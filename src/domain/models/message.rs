//! Message domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Recipient value addressing every connected agent.
pub const RECIPIENT_ALL: &str = "all";

/// Sender used for server-synthesized messages (alerts, completions).
pub const SENDER_SYSTEM: &str = "system";

/// A message between agents, or from the server to an agent.
///
/// The read flag is monotonic: once read, a message never reverts to
/// unread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique monotonic identifier
    pub id: i64,
    pub from: String,
    /// Agent id, [`RECIPIENT_ALL`], or a synthesized recipient
    pub to: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

impl Message {
    pub fn new(id: i64, from: impl Into<String>, to: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id,
            from: from.into(),
            to: to.into(),
            content: content.into(),
            timestamp: Utc::now(),
            read: false,
        }
    }

    /// A message synthesized by the server itself.
    pub fn system(id: i64, to: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(id, SENDER_SYSTEM, to, content)
    }

    /// Whether this message is addressed to the given agent.
    pub fn addressed_to(&self, agent: &str) -> bool {
        self.to == agent || self.to == RECIPIENT_ALL
    }
}
