use chrono::{ DateTime, Utc };
use dashmap::DashMap;
use log::debug;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct SessionEntry {
    pub session_id: Uuid,
    pub peer: SocketAddr,
    pub connected_at: DateTime<Utc>,
}

/// Which sessions are currently attached to which conversation.
#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: DashMap<String, HashMap<Uuid, SessionEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session until the returned guard is dropped.
    pub fn register(self: &Arc<Self>, conversation_id: &str, peer: SocketAddr) -> Registration {
        let entry = SessionEntry {
            session_id: Uuid::new_v4(),
            peer,
            connected_at: Utc::now(),
        };
        let session_id = entry.session_id;
        self.sessions.entry(conversation_id.to_string()).or_default().insert(session_id, entry);
        debug!("Registered session {} on conversation '{}'", session_id, conversation_id);

        Registration {
            registry: Arc::clone(self),
            conversation_id: conversation_id.to_string(),
            session_id,
        }
    }

    fn unregister(&self, conversation_id: &str, session_id: Uuid) {
        if let Some(mut sessions) = self.sessions.get_mut(conversation_id) {
            sessions.remove(&session_id);
        }
        self.sessions.remove_if(conversation_id, |_, sessions| sessions.is_empty());
        debug!("Unregistered session {} from conversation '{}'", session_id, conversation_id);
    }

    pub fn sessions(&self, conversation_id: &str) -> Vec<SessionEntry> {
        self.sessions
            .get(conversation_id)
            .map(|sessions| sessions.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.sessions.contains_key(conversation_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .iter()
            .map(|entry| entry.value().len())
            .sum()
    }

    pub fn conversation_count(&self) -> usize {
        self.sessions.len()
    }
}

pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    conversation_id: String,
    session_id: Uuid,
}

impl Registration {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(&self.conversation_id, self.session_id);
    }
}
