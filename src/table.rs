//! Terminator session table
//!
//! Maps datagram peer addresses to live sessions. Insertions and lookups
//! happen on the single datagram-receive task; deletions happen
//! concurrently from per-session relay teardown, so every access goes
//! through one lock. Critical sections are short and synchronous: awaited
//! I/O always happens on handles cloned out of the table, never while the
//! lock is held.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::session::SessionKey;

/// Synchronized map from peer address to session.
///
/// Guarantees at most one entry per key; removal of an absent key is a
/// no-op, keeping teardown idempotent.
#[derive(Debug)]
pub struct SessionTable<S> {
    inner: RwLock<HashMap<SessionKey, Arc<S>>>,
}

impl<S> SessionTable<S> {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a session for a key
    ///
    /// Returns `true` if the session was inserted. If an entry already
    /// exists for the key the table is left unchanged and `false` is
    /// returned; the caller decides what to do with the rejected session.
    pub fn insert(&self, key: SessionKey, session: Arc<S>) -> bool {
        let mut inner = self.inner.write();
        if inner.contains_key(&key) {
            return false;
        }
        inner.insert(key, session);
        true
    }

    /// Look up the session for a key
    #[must_use]
    pub fn get(&self, key: &SessionKey) -> Option<Arc<S>> {
        self.inner.read().get(key).cloned()
    }

    /// Check whether a session exists for a key
    #[must_use]
    pub fn contains(&self, key: &SessionKey) -> bool {
        self.inner.read().contains_key(key)
    }

    /// Remove and return the session for a key
    ///
    /// Removing an absent key returns `None` without error.
    pub fn remove(&self, key: &SessionKey) -> Option<Arc<S>> {
        self.inner.write().remove(key)
    }

    /// Number of live sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Remove and return every session (used at endpoint shutdown)
    pub fn drain(&self) -> Vec<(SessionKey, Arc<S>)> {
        self.inner.write().drain().collect()
    }

    /// Snapshot of the current keys
    #[must_use]
    pub fn keys(&self) -> Vec<SessionKey> {
        self.inner.read().keys().copied().collect()
    }
}

impl<S> Default for SessionTable<S> {
    fn default() -> Self {
        Self::new()
    }
}
