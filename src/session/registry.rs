//! Registry of live network sessions, keyed by configured network name.

use super::Session;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("network {0} configured twice")]
    DuplicateNetwork(String),
}

/// All sessions this process runs, for HTTP routing and shutdown.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<Session>) -> Result<(), RegistryError> {
        let key = session.config().network.to_ascii_lowercase();
        if self.sessions.contains_key(&key) {
            return Err(RegistryError::DuplicateNetwork(session.config().network.clone()));
        }
        self.sessions.insert(key, session);
        Ok(())
    }

    /// Look up a session by configured name or by the network name learned
    /// from the server, case-insensitively.
    pub fn by_network(&self, name: &str) -> Option<Arc<Session>> {
        let key = name.to_ascii_lowercase();
        if let Some(entry) = self.sessions.get(&key) {
            return Some(Arc::clone(entry.value()));
        }
        self.sessions
            .iter()
            .find(|entry| entry.value().matches_network(name))
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|entry| Arc::clone(entry.value())).collect()
    }
}
