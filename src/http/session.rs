//! Session registry.
//!
//! Maps `Mcp-Session-Id` values to live transports. The registry inserts a
//! transport once its initialize succeeds and hands it a [`CloseHandle`];
//! closing the transport (DELETE, idle expiry, shutdown) fires the handle,
//! which removes the entry. The handle holds only a weak reference, so a
//! transport never keeps the store alive.

use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};

use crate::http::transport::StreamableHttpTransport;

/// Session identifier handed to the client in `Mcp-Session-Id`.
pub type SessionId = String;

/// Storage behind the session registry.
pub trait SessionStore: Send + Sync {
    fn insert(&self, id: SessionId, transport: Arc<StreamableHttpTransport>);

    fn get(&self, id: &str) -> Option<Arc<StreamableHttpTransport>>;

    fn remove(&self, id: &str) -> Option<Arc<StreamableHttpTransport>>;

    /// Remove and return every entry.
    fn drain(&self) -> Vec<Arc<StreamableHttpTransport>>;

    /// Current entries, without removing them.
    fn transports(&self) -> Vec<Arc<StreamableHttpTransport>>;

    fn ids(&self) -> Vec<SessionId>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Session store over a sharded concurrent map.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<SessionId, Arc<StreamableHttpTransport>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn insert(&self, id: SessionId, transport: Arc<StreamableHttpTransport>) {
        self.sessions.insert(id, transport);
    }

    fn get(&self, id: &str) -> Option<Arc<StreamableHttpTransport>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    fn remove(&self, id: &str) -> Option<Arc<StreamableHttpTransport>> {
        self.sessions.remove(id).map(|(_, transport)| transport)
    }

    fn drain(&self) -> Vec<Arc<StreamableHttpTransport>> {
        let ids = self.ids();
        ids.iter().filter_map(|id| self.remove(id)).collect()
    }

    fn transports(&self) -> Vec<Arc<StreamableHttpTransport>> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }
}

/// Removes one session from its store when fired.
#[derive(Clone)]
pub struct CloseHandle {
    session_id: SessionId,
    store: Weak<dyn SessionStore>,
}

impl CloseHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Remove the session. A store that is already gone is ignored.
    pub fn fire(self) {
        match self.store.upgrade() {
            Some(store) => {
                if store.remove(&self.session_id).is_some() {
                    debug!(session_id = %self.session_id, "Session removed from registry");
                }
            }
            None => debug!(session_id = %self.session_id, "Session store already dropped"),
        }
    }
}

impl std::fmt::Debug for CloseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloseHandle")
            .field("session_id", &self.session_id)
            .finish()
    }
}

/// Process-wide map of live sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(Arc::new(InMemorySessionStore::new()))
    }
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Register an initialized transport and give it its close handle.
    pub fn insert(&self, session_id: SessionId, transport: Arc<StreamableHttpTransport>) {
        let handle = CloseHandle {
            session_id: session_id.clone(),
            store: Arc::downgrade(&self.store),
        };
        self.store.insert(session_id.clone(), transport.clone());
        transport.attach_close_handle(handle);
        info!(session_id = %session_id, sessions = self.store.len(), "Session registered");
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<StreamableHttpTransport>> {
        self.store.get(session_id)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.store.ids()
    }

    /// Close sessions with no activity and no attached stream for longer
    /// than `max_idle`. Returns how many were closed.
    pub fn reap_idle(&self, max_idle: Duration) -> usize {
        let idle: Vec<_> = self
            .store
            .transports()
            .into_iter()
            .filter(|t| !t.has_stream() && t.idle_for() > max_idle)
            .collect();

        for transport in &idle {
            info!(
                session_id = transport.session_id().as_deref().unwrap_or("-"),
                "Closing idle session"
            );
            transport.close();
        }
        idle.len()
    }

    /// Close every session. Used at shutdown.
    pub fn close_all(&self) {
        let transports = self.store.drain();
        if !transports.is_empty() {
            info!("Closing {} session(s)", transports.len());
        }
        for transport in transports {
            transport.close();
        }
    }
}
