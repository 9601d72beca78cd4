//! Connection registry.
//!
//! The authoritative set of connected, writable clients. The lock is held only
//! for the map operation itself; broadcasters work on a [`snapshot`] so that a
//! slow peer never blocks registration or delivery to other peers.
//!
//! [`snapshot`]: ConnectionRegistry::snapshot

use std::{
    collections::HashMap,
    fmt,
    sync::{Mutex, MutexGuard},
};

use crate::conn::{ConnHandle, ConnId};

/// Registry operation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// The id is already present. Indicates an accept loop bug.
    AlreadyRegistered(ConnId),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::AlreadyRegistered(id) => {
                write!(f, "connection {} is already registered", id)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Thread-safe set of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    conns: Mutex<HashMap<ConnId, ConnHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Every critical section is a single map operation, so a panic while the
    // lock was held cannot have left the map half-updated.
    fn lock(&self) -> MutexGuard<'_, HashMap<ConnId, ConnHandle>> {
        self.conns.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds a connection.
    pub fn register(&self, handle: ConnHandle) -> Result<(), RegistryError> {
        let id = handle.id();
        let mut conns = self.lock();
        if conns.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }
        conns.insert(id, handle);
        Ok(())
    }

    /// Removes a connection. Returns `true` only for the call that removed it;
    /// repeated or racing calls are no-ops.
    pub fn deregister(&self, id: ConnId) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Current membership, detached from the lock.
    pub fn snapshot(&self) -> Vec<ConnHandle> {
        self.lock().values().cloned().collect()
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
