use super::Session;
use std::collections::HashMap;

/// All live sessions, keyed by session id. Owned by the hub task; nothing
/// else holds a reference.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, session_id: &str) -> &mut Session {
        self.sessions.entry(session_id.to_owned()).or_insert_with(|| Session::new(session_id))
    }

    pub fn get(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn get_mut(&mut self, session_id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(session_id)
    }

    /// Drop the session if it holds no connections. Returns true when it was
    /// removed.
    pub fn remove_if_empty(&mut self, session_id: &str) -> bool {
        if self.sessions.get(session_id).is_some_and(Session::is_empty) {
            self.sessions.remove(session_id);
            return true;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids = self.sessions.keys().cloned().collect::<Vec<_>>();
        ids.sort();
        ids
    }
}
