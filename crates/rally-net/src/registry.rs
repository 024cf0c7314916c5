//! Thread-safe map of live connections keyed by [`PeerId`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::{Connection, PeerId};

/// Error returned when the registry is at capacity.
#[derive(Debug)]
pub struct ConnectionLimitReached;

/// Concurrent registry shared by the accept loop, receive loops, idle
/// monitor and the public server API.
pub struct ConnectionRegistry {
    inner: RwLock<HashMap<PeerId, Arc<Connection>>>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a new registry with the given capacity limit.
    pub fn new(max_connections: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            max_connections,
        }
    }

    /// Register a connection. Returns `Err` if the registry is at capacity.
    pub async fn insert(&self, conn: Arc<Connection>) -> Result<(), ConnectionLimitReached> {
        let mut map = self.inner.write().await;
        if map.len() >= self.max_connections {
            return Err(ConnectionLimitReached);
        }
        map.insert(conn.peer().clone(), conn);
        Ok(())
    }

    /// Whether another connection would be accepted right now.
    pub async fn has_capacity(&self) -> bool {
        self.inner.read().await.len() < self.max_connections
    }

    /// Look up a connection.
    pub async fn get(&self, peer: &PeerId) -> Option<Arc<Connection>> {
        self.inner.read().await.get(peer).cloned()
    }

    /// Remove `conn` only if it is still the record registered under its
    /// identity. Returns whether it was removed.
    pub async fn remove_if_current(&self, conn: &Arc<Connection>) -> bool {
        let mut map = self.inner.write().await;
        match map.get(conn.peer()) {
            Some(current) if Arc::ptr_eq(current, conn) => {
                map.remove(conn.peer());
                true
            }
            _ => false,
        }
    }

    /// Force a connection out: unregister it and close it so its receive
    /// loop stops. The reason reported at teardown is whatever was marked
    /// on the record beforehand.
    pub async fn evict(&self, conn: &Arc<Connection>) {
        self.remove_if_current(conn).await;
        conn.close().await;
    }

    /// Remove and return every connection.
    pub async fn drain(&self) -> Vec<Arc<Connection>> {
        self.inner.write().await.drain().map(|(_, c)| c).collect()
    }

    /// Identities of every registered connection.
    pub async fn peers(&self) -> Vec<PeerId> {
        self.inner.read().await.keys().cloned().collect()
    }

    /// Snapshot of every registered connection.
    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.inner.read().await.values().cloned().collect()
    }

    /// Whether `peer` is registered.
    pub async fn contains(&self, peer: &PeerId) -> bool {
        self.inner.read().await.contains_key(peer)
    }

    /// Return the number of registered connections.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Return whether the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
