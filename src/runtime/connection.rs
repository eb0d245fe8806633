//! Registry of in-flight connections.
//!
//! Every accepted connection holds a `ConnectionGuard` for its lifetime.
//! Dropping the guard removes the entry; when the last entry goes, anyone
//! waiting in `drain` is woken. The shutdown path uses this to wait for
//! sessions and transfers to finish.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use slab::Slab;
use tokio::sync::Notify;

use crate::config::ProtocolType;

/// One live connection.
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    pub peer: SocketAddr,
    pub protocol: ProtocolType,
    pub accepted_at: DateTime<Utc>,
}

impl ConnectionEntry {
    pub fn new(peer: SocketAddr, protocol: ProtocolType) -> Self {
        Self {
            peer,
            protocol,
            accepted_at: Utc::now(),
        }
    }

    /// Time since accept, truncated to zero if the clock stepped back.
    pub fn age(&self) -> chrono::Duration {
        (Utc::now() - self.accepted_at).max(chrono::Duration::zero())
    }
}

/// Slab-backed set of live connections.
///
/// Provides O(1) insert and remove.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<Slab<ConnectionEntry>>,
    drained: Notify,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Slab<ConnectionEntry>> {
        // A panic while holding the lock cannot leave the slab half-updated.
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a connection; it stays registered until the guard drops.
    pub fn register(self: &Arc<Self>, entry: ConnectionEntry) -> ConnectionGuard {
        let id = self.lock().insert(entry);
        ConnectionGuard {
            id,
            registry: Arc::clone(self),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current entries with their ids.
    pub fn snapshot(&self) -> Vec<(usize, ConnectionEntry)> {
        self.lock()
            .iter()
            .map(|(id, entry)| (id, entry.clone()))
            .collect()
    }

    fn remove(&self, id: usize) {
        let now_empty = {
            let mut connections = self.lock();
            connections.try_remove(id);
            connections.is_empty()
        };
        if now_empty {
            self.drained.notify_waiters();
        }
    }

    /// Wait until no connections remain or `timeout` elapses.
    ///
    /// Returns the number of connections still open.
    pub async fn drain(&self, timeout: Duration) -> usize {
        let wait = async {
            loop {
                let notified = self.drained.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.is_empty() {
                    return;
                }
                notified.await;
            }
        };

        let _ = tokio::time::timeout(timeout, wait).await;
        self.len()
    }
}

/// Keeps a connection registered while alive.
#[derive(Debug)]
pub struct ConnectionGuard {
    id: usize,
    registry: Arc<ConnectionRegistry>,
}

impl ConnectionGuard {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
