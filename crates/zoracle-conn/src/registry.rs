//! Connection registry — the endpoint → connection map and its lock.
//!
//! This is the inner lock of the manager. It guards map reads and writes
//! only and is never held across a driver call: entries are detached under
//! the lock and their sessions closed after it is released.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::connection::ManagedConnection;
use crate::endpoint::Endpoint;

pub(crate) struct Registry {
    connections: Mutex<HashMap<Endpoint, Arc<ManagedConnection>>>,
    keep_alive: Duration,
    /// Upper bound for a single session close.
    close_timeout: Duration,
}

impl Registry {
    pub(crate) fn new(keep_alive: Duration, close_timeout: Duration) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            keep_alive,
            close_timeout,
        }
    }

    /// Look up `endpoint`, marking the connection as just accessed on a hit.
    pub(crate) async fn lookup(&self, endpoint: &Endpoint) -> Option<Arc<ManagedConnection>> {
        let connections = self.connections.lock().await;
        let conn = connections.get(endpoint)?;
        conn.touch();
        Some(Arc::clone(conn))
    }

    /// Register a freshly created connection.
    ///
    /// # Panics
    ///
    /// If `endpoint` already has a live entry. Creation is serialized by the
    /// manager, so a second entry means that serialization is broken.
    pub(crate) async fn insert(&self, endpoint: Endpoint, conn: Arc<ManagedConnection>) {
        let mut connections = self.connections.lock().await;
        if connections.contains_key(&endpoint) {
            panic!("connection already exists for {endpoint}");
        }
        connections.insert(endpoint, conn);
    }

    pub(crate) async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub(crate) async fn contains(&self, endpoint: &Endpoint) -> bool {
        self.connections.lock().await.contains_key(endpoint)
    }

    /// Close and remove every connection idle longer than the keep-alive
    /// window. Returns the number of evicted entries.
    pub(crate) async fn close_unused(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(Endpoint, Arc<ManagedConnection>)> = {
            let mut connections = self.connections.lock().await;
            let stale: Vec<Endpoint> = connections
                .iter()
                .filter(|(_, conn)| conn.idle_for(now) > self.keep_alive)
                .map(|(endpoint, _)| endpoint.clone())
                .collect();
            stale
                .into_iter()
                .filter_map(|endpoint| {
                    let conn = connections.remove(&endpoint)?;
                    Some((endpoint, conn))
                })
                .collect()
        };

        for (endpoint, conn) in &expired {
            conn.close(self.close_timeout).await;
            debug!(
                endpoint = %endpoint,
                service = %endpoint.service(),
                idle = ?conn.idle_for(now),
                "closed unused connection"
            );
        }

        if !expired.is_empty() {
            info!(
                reaped = expired.len(),
                keep_alive = ?self.keep_alive,
                "reaped idle connections"
            );
        }
        expired.len()
    }

    /// Close and remove every connection, leaving the registry empty.
    pub(crate) async fn close_all(&self) -> usize {
        let drained: Vec<(Endpoint, Arc<ManagedConnection>)> =
            self.connections.lock().await.drain().collect();

        for (endpoint, conn) in &drained {
            conn.close(self.close_timeout).await;
            debug!(endpoint = %endpoint, "closed connection during shutdown");
        }
        drained.len()
    }

    pub(crate) async fn log_stats(&self) {
        let connections = self.connections.lock().await;
        let now = Instant::now();
        for (endpoint, conn) in connections.iter() {
            info!(
                endpoint = %endpoint,
                service = %endpoint.service(),
                user = %conn.identity(),
                server_version = %conn.server_version(),
                idle = ?conn.idle_for(now),
                "cached connection"
            );
        }
        info!(total = connections.len(), "connection registry statistics");
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("keep_alive", &self.keep_alive)
            .field("close_timeout", &self.close_timeout)
            .finish_non_exhaustive()
    }
}
