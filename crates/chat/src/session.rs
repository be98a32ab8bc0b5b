//! In-process session store
//!
//! Sessions hold the active schema and a bounded conversation history.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use uuid::Uuid;

/// Messages kept per session
const MAX_HISTORY: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct SessionMessage {
    pub role: String,
    pub content: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub session_id: String,
    pub active_schema: Option<String>,
    pub history: VecDeque<SessionMessage>,
    pub created_at: DateTime<Utc>,
}

/// Store of chat sessions for this process
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a session, creating it (with a fresh id when none given)
    pub fn get_or_create(&self, session_id: Option<&str>) -> Session {
        let mut sessions = self.sessions.lock().unwrap();

        if let Some(id) = session_id {
            if let Some(session) = sessions.get(id) {
                return session.clone();
            }
        }

        let id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let session = Session {
            session_id: id.clone(),
            active_schema: None,
            history: VecDeque::new(),
            created_at: Utc::now(),
        };
        sessions.insert(id, session.clone());
        session
    }

    pub fn set_active_schema(&self, session_id: &str, schema: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.get_mut(session_id) {
            session.active_schema = Some(schema.to_string());
        }
    }

    /// Append a message, trimming history to the bound
    pub fn append(&self, session_id: &str, role: &str, content: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.get_mut(session_id) {
            session.history.push_back(SessionMessage {
                role: role.to_string(),
                content: content.to_string(),
                at: Utc::now(),
            });
            while session.history.len() > MAX_HISTORY {
                session.history.pop_front();
            }
        }
    }

    pub fn history(&self, session_id: &str) -> Option<Vec<SessionMessage>> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .map(|s| s.history.iter().cloned().collect())
    }

    pub fn delete(&self, session_id: &str) -> bool {
        self.sessions.lock().unwrap().remove(session_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_reuse() {
        let store = SessionStore::new();
        let a = store.get_or_create(None);
        let b = store.get_or_create(Some(&a.session_id));
        assert_eq!(a.session_id, b.session_id);

        let c = store.get_or_create(None);
        assert_ne!(a.session_id, c.session_id);
    }

    #[test]
    fn test_history_is_bounded() {
        let store = SessionStore::new();
        let session = store.get_or_create(None);
        for i in 0..30 {
            store.append(&session.session_id, "user", &format!("q{}", i));
        }
        let history = store.history(&session.session_id).unwrap();
        assert_eq!(history.len(), MAX_HISTORY);
        assert_eq!(history[0].content, "q10");
    }

    #[test]
    fn test_active_schema_sticks() {
        let store = SessionStore::new();
        let session = store.get_or_create(None);
        store.set_active_schema(&session.session_id, "retail");
        let again = store.get_or_create(Some(&session.session_id));
        assert_eq!(again.active_schema.as_deref(), Some("retail"));
    }

    #[test]
    fn test_delete() {
        let store = SessionStore::new();
        let session = store.get_or_create(None);
        assert!(store.delete(&session.session_id));
        assert!(!store.delete(&session.session_id));
    }
}
