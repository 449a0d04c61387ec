//! Session registry: live RPC sessions mapped to agent identities.
//!
//! The notifier uses it to push per-session updates; tool middleware uses
//! it to answer "who am I" and the worker manager to avoid spawning a
//! type that already has a connected instance.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use uuid::Uuid;

/// Payload of a `pair_update` push notification.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PairUpdate {
    pub unread_messages: usize,
    pub pending_tasks: usize,
    pub summary: String,
}

/// Capacity of each per-session push channel. When full, pushes are
/// dropped; the next push coalesces the state anyway.
pub const PUSH_CHANNEL_CAPACITY: usize = 8;

struct SessionEntry {
    agent: String,
    push: mpsc::Sender<PairUpdate>,
}

/// Mutex-guarded map of live sessions.
///
/// A single agent identity maps to at most one active session; a later
/// registration displaces the earlier one.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a session with an agent identity. Any other session
    /// registered for the same agent is displaced.
    pub fn register(&self, session_id: Uuid, agent: &str, push: mpsc::Sender<PairUpdate>) {
        let Ok(mut sessions) = self.sessions.lock() else {
            return;
        };
        sessions.retain(|id, entry| *id == session_id || entry.agent != agent);
        sessions.insert(
            session_id,
            SessionEntry {
                agent: agent.to_string(),
                push,
            },
        );
    }

    pub fn remove(&self, session_id: Uuid) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&session_id);
        }
    }

    /// Agent identity bound to a session, if it has identified itself.
    pub fn agent_for_session(&self, session_id: Uuid) -> Option<String> {
        self.sessions
            .lock()
            .ok()?
            .get(&session_id)
            .map(|e| e.agent.clone())
    }

    /// All currently connected agent identities.
    pub fn connected_agents(&self) -> Vec<String> {
        self.sessions
            .lock()
            .map(|s| s.values().map(|e| e.agent.clone()).collect())
            .unwrap_or_default()
    }

    /// Whether an agent — or any instance of an agent type — has an
    /// active session. Instance ids follow the `<type>-<n>` convention.
    pub fn has_active_session(&self, agent_or_type: &str) -> bool {
        let prefix = format!("{agent_or_type}-");
        self.sessions
            .lock()
            .map(|s| {
                s.values()
                    .any(|e| e.agent == agent_or_type || e.agent.starts_with(&prefix))
            })
            .unwrap_or(false)
    }

    pub fn session_for_agent(&self, agent: &str) -> Option<Uuid> {
        self.sessions
            .lock()
            .ok()?
            .iter()
            .find(|(_, e)| e.agent == agent)
            .map(|(id, _)| *id)
    }

    /// Push an update to the agent's session, dropping it when the
    /// channel is full or the session is gone.
    pub fn push_to_agent(&self, agent: &str, update: PairUpdate) -> bool {
        let Ok(sessions) = self.sessions.lock() else {
            return false;
        };
        let Some(entry) = sessions.values().find(|e| e.agent == agent) else {
            return false;
        };
        match entry.push.try_send(update) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(agent = agent, error = %err, "Dropped push notification");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (mpsc::Sender<PairUpdate>, mpsc::Receiver<PairUpdate>) {
        mpsc::channel(PUSH_CHANNEL_CAPACITY)
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = channel();
        let session = Uuid::new_v4();

        registry.register(session, "claude-code-1", tx);
        assert_eq!(
            registry.agent_for_session(session),
            Some("claude-code-1".to_string())
        );
        assert_eq!(registry.session_for_agent("claude-code-1"), Some(session));
        assert!(registry.has_active_session("claude-code-1"));
        // Type-level check matches the instance.
        assert!(registry.has_active_session("claude-code"));
        assert!(!registry.has_active_session("cursor"));
    }

    #[test]
    fn test_later_registration_displaces() {
        let registry = SessionRegistry::new();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();

        registry.register(old, "cursor", tx1);
        registry.register(new, "cursor", tx2);

        assert_eq!(registry.session_for_agent("cursor"), Some(new));
        assert_eq!(registry.agent_for_session(old), None);
        assert_eq!(registry.connected_agents().len(), 1);
    }

    #[test]
    fn test_push_delivery_and_drop() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::channel(1);
        registry.register(Uuid::new_v4(), "cursor", tx);

        let update = PairUpdate {
            unread_messages: 1,
            pending_tasks: 0,
            summary: "1 unread".to_string(),
        };
        assert!(registry.push_to_agent("cursor", update.clone()));
        // Channel is full now; the next push is dropped, not an error.
        assert!(!registry.push_to_agent("cursor", update.clone()));
        assert_eq!(rx.try_recv().unwrap(), update);

        assert!(!registry.push_to_agent("nobody", update));
    }

    #[test]
    fn test_remove() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = channel();
        let session = Uuid::new_v4();
        registry.register(session, "w-1", tx);
        registry.remove(session);
        assert!(registry.connected_agents().is_empty());
    }
}
