//! The set of live connections.
//!
//! Iteration always runs over a snapshot taken under the read lock, so a
//! visitor can close connections, and other tasks can register or
//! unregister, without deadlocking or disturbing the pass.

use std::collections::HashMap;
use std::sync::Arc;

use relay_core::ConnectionId;
use tokio::sync::RwLock;

use crate::websocket::connection::Connection;

/// Connection handle → connection (which carries its bound identity).
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a connection, replacing any entry with the same handle.
    pub async fn register(&self, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        let mut conns = self.connections.write().await;
        conns.insert(connection.id().clone(), connection)
    }

    /// Remove a connection. Absent handles are a no-op.
    pub async fn unregister(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let mut conns = self.connections.write().await;
        conns.remove(id)
    }

    /// Visit every connection registered at the time of the call.
    pub async fn for_each(&self, mut visit: impl FnMut(&Arc<Connection>)) {
        for connection in self.snapshot().await {
            visit(&connection);
        }
    }

    async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Number of registered connections.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Whether no connections are registered.
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
