//! Connection pool with non-blocking, evicting fan-out.

use super::conn::Connection;
use super::transport::Message;
use crate::error::{Result, StoreError};
use crate::types::ConnectionKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of a [`ConnectionPool::publish`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Connections the message was enqueued on.
    pub delivered: usize,
    /// Connections closed and removed because their queue was full.
    pub evicted: Vec<ConnectionKey>,
}

/// Registry of live subscriber connections.
pub struct ConnectionPool {
    connections: Mutex<HashMap<ConnectionKey, Arc<Connection>>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Register `conn` under its key.
    pub fn add_connection(&self, conn: Arc<Connection>) -> Result<()> {
        let mut connections = self.connections.lock();
        if connections.contains_key(conn.key()) {
            return Err(StoreError::DuplicateConnection(conn.key().clone()));
        }
        tracing::debug!(connection = %conn.key(), "connection added");
        connections.insert(conn.key().clone(), conn);
        Ok(())
    }

    /// Remove and close the connection registered under `key`.
    pub fn remove_connection(&self, key: &ConnectionKey) -> Option<Arc<Connection>> {
        let removed = self.connections.lock().remove(key);
        if let Some(ref conn) = removed {
            conn.close();
            tracing::debug!(connection = %key, "connection removed");
        }
        removed
    }

    /// Remove `conn` only if it is still the entry for its key.
    pub(crate) fn remove_if_current(&self, conn: &Arc<Connection>) -> bool {
        let removed = {
            let mut connections = self.connections.lock();
            match connections.get(conn.key()) {
                Some(current) if Arc::ptr_eq(current, conn) => {
                    connections.remove(conn.key());
                    true
                }
                _ => false,
            }
        };
        conn.close();
        removed
    }

    pub fn get(&self, key: &ConnectionKey) -> Option<Arc<Connection>> {
        self.connections.lock().get(key).cloned()
    }

    /// Copy of the current connections.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Enqueue `message` on every current connection without blocking.
    ///
    /// Connections whose queue is full are closed and removed; the
    /// failure is only logged.
    pub fn publish(&self, message: &Message) -> PublishReport {
        let mut report = PublishReport::default();
        let mut to_remove = Vec::new();

        for conn in self.connections() {
            if conn.try_publish(message.clone()) {
                report.delivered += 1;
            } else {
                to_remove.push(conn);
            }
        }

        for conn in to_remove {
            tracing::warn!(
                connection = %conn.key(),
                queued = conn.queued(),
                "subscriber not draining, evicting"
            );
            self.remove_if_current(&conn);
            report.evicted.push(conn.key().clone());
        }

        report
    }

    /// Close and remove every connection.
    pub fn close_all(&self) {
        let drained: Vec<_> = self.connections.lock().drain().map(|(_, c)| c).collect();
        for conn in drained {
            conn.close();
        }
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MemoryTransport;
    use serde_json::json;

    fn idle_connection(key: &str, capacity: usize) -> Arc<Connection> {
        let (transport, _peer) = MemoryTransport::pair(key);
        Connection::new(transport, capacity)
    }

    #[test]
    fn test_add_remove() {
        let pool = ConnectionPool::new();
        pool.add_connection(idle_connection("a", 4)).unwrap();
        assert_eq!(pool.len(), 1);

        let removed = pool.remove_connection(&ConnectionKey::from("a")).unwrap();
        assert!(removed.is_closed());
        assert!(pool.is_empty());
        assert!(pool.remove_connection(&ConnectionKey::from("a")).is_none());
    }

    #[test]
    fn test_duplicate_connection() {
        let pool = ConnectionPool::new();
        pool.add_connection(idle_connection("a", 4)).unwrap();

        let result = pool.add_connection(idle_connection("a", 4));
        assert!(matches!(result, Err(StoreError::DuplicateConnection(_))));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_publish_evicts_full_queue() {
        let pool = ConnectionPool::new();
        let slow = idle_connection("slow", 1);
        assert!(slow.try_publish(Message::new(json!("backlog"))));
        pool.add_connection(slow.clone()).unwrap();
        pool.add_connection(idle_connection("b", 4)).unwrap();
        pool.add_connection(idle_connection("c", 4)).unwrap();

        let report = pool.publish(&Message::new(json!("update")));

        assert_eq!(report.delivered, 2);
        assert_eq!(report.evicted, vec![ConnectionKey::from("slow")]);
        assert!(slow.is_closed());
        assert!(pool.get(&ConnectionKey::from("slow")).is_none());
        assert!(pool.connections().iter().all(|c| c.queued() == 1));
    }

    #[test]
    fn test_snapshot_unaffected_by_later_mutation() {
        let pool = ConnectionPool::new();
        pool.add_connection(idle_connection("a", 4)).unwrap();

        let snapshot = pool.connections();
        pool.add_connection(idle_connection("b", 4)).unwrap();
        pool.remove_connection(&ConnectionKey::from("a"));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].key().as_str(), "a");
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_stale_removal_keeps_replacement() {
        let pool = ConnectionPool::new();
        let old = idle_connection("a", 4);
        pool.add_connection(old.clone()).unwrap();
        pool.remove_connection(old.key());

        let replacement = idle_connection("a", 4);
        pool.add_connection(replacement.clone()).unwrap();

        assert!(!pool.remove_if_current(&old));
        assert!(Arc::ptr_eq(&pool.get(old.key()).unwrap(), &replacement));
        assert!(!replacement.is_closed());
    }

    #[test]
    fn test_close_all() {
        let pool = ConnectionPool::new();
        let a = idle_connection("a", 4);
        pool.add_connection(a.clone()).unwrap();
        pool.close_all();

        assert!(pool.is_empty());
        assert!(a.is_closed());
    }
}
