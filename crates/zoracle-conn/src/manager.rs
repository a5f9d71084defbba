//! Connection manager — get-or-create over the registry.
//!
//! # Locking
//!
//! Two scopes, deliberately kept apart:
//!
//! - the **outer** lock (`create_lock`) is held for the whole lookup-or-create
//!   sequence of [`ConnManager::get_or_create`] and by [`ConnManager::shutdown`],
//!   so at most one creation is in flight and shutdown never races it;
//! - the **inner** lock lives in the registry and covers map reads and writes
//!   only. The housekeeper takes just this one.
//!
//! Queries run on a returned [`ManagedConnection`] take neither lock.
//!
//! # Flow
//!
//! ```text
//! get_or_create(endpoint)
//!   → outer lock
//!     → registry hit → touch last access → return
//!     → miss → open session → negotiate version (both within connect timeout)
//!            → success → register → return
//!            → failure → close half-open session → ConnectionFailed / DeadlineExceeded
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::connection::ManagedConnection;
use crate::driver::{ConnectDescriptor, ConnectionFactory, Session};
use crate::endpoint::Endpoint;
use crate::error::ConnError;
use crate::housekeeper;
use crate::registry::Registry;

/// Timing configuration for a [`ConnManager`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Idle connections older than this are reaped (default: 300s).
    pub keep_alive: Duration,
    /// Bound for dial plus version negotiation (default: 5s).
    pub connect_timeout: Duration,
    /// Bound for a single query issued through a call context (default: 5s).
    pub call_timeout: Duration,
    /// How often the housekeeper scans for idle connections (default: 10s).
    pub housekeeping_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(5),
            housekeeping_interval: Duration::from_secs(10),
        }
    }
}

/// Caches one live connection per [`Endpoint`] and reclaims idle ones.
pub struct ConnManager {
    /// Outer lock: serializes get-or-create and shutdown.
    create_lock: Mutex<()>,
    registry: Arc<Registry>,
    config: ManagerConfig,
    factory: Arc<dyn ConnectionFactory>,
    shutdown_tx: watch::Sender<bool>,
    housekeeper: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
    /// Reference point for connection access timestamps.
    epoch: Instant,
}

impl ConnManager {
    /// Create a manager and start its housekeeper.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ManagerConfig, factory: Arc<dyn ConnectionFactory>) -> Self {
        let registry = Arc::new(Registry::new(config.keep_alive, config.connect_timeout));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let interval = config.housekeeping_interval.max(Duration::from_millis(1));
        let handle = housekeeper::spawn(Arc::clone(&registry), interval, shutdown_rx);

        info!(
            keep_alive = ?config.keep_alive,
            connect_timeout = ?config.connect_timeout,
            call_timeout = ?config.call_timeout,
            housekeeping_interval = ?interval,
            "connection manager started"
        );

        Self {
            create_lock: Mutex::new(()),
            registry,
            config,
            factory,
            shutdown_tx,
            housekeeper: Mutex::new(Some(handle)),
            shut_down: AtomicBool::new(false),
            epoch: Instant::now(),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Return the cached connection for `endpoint`, or build one.
    ///
    /// A hit refreshes the connection's last access time. A failed build
    /// leaves the registry untouched.
    pub async fn get_or_create(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Arc<ManagedConnection>, ConnError> {
        let _guard = self.create_lock.lock().await;

        if self.is_shut_down() {
            return Err(ConnError::ManagerShutdown);
        }

        if let Some(conn) = self.registry.lookup(endpoint).await {
            trace!(endpoint = %endpoint, "reusing cached connection");
            return Ok(conn);
        }

        debug!(endpoint = %endpoint, service = %endpoint.service(), "creating connection");
        let conn = match self.create(endpoint).await {
            Ok(conn) => Arc::new(conn),
            Err(e) => {
                debug!(
                    endpoint = %endpoint,
                    error = %e,
                    native_code = e.native().map(|n| n.code),
                    "failed to create connection"
                );
                return Err(e);
            }
        };

        self.registry.insert(endpoint.clone(), Arc::clone(&conn)).await;
        debug!(
            endpoint = %endpoint,
            server_version = %conn.server_version(),
            "created new connection"
        );
        Ok(conn)
    }

    /// Open and negotiate a session, both bounded by the connect timeout.
    async fn create(&self, endpoint: &Endpoint) -> Result<ManagedConnection, ConnError> {
        let descriptor = ConnectDescriptor::new(endpoint, self.config.connect_timeout);
        trace!(connect_string = %descriptor.connect_string(), "dialing");

        let deadline = Instant::now() + self.config.connect_timeout;

        let session = tokio::time::timeout_at(deadline, self.factory.open(&descriptor))
            .await
            .map_err(|_| ConnError::DeadlineExceeded)?
            .map_err(|source| ConnError::ConnectionFailed { source })?;

        let negotiated = tokio::time::timeout_at(deadline, session.negotiate()).await;
        let version = match negotiated {
            Ok(Ok(version)) => version,
            Ok(Err(source)) => {
                discard(endpoint, session, self.config.connect_timeout).await;
                return Err(ConnError::ConnectionFailed { source });
            }
            Err(_) => {
                discard(endpoint, session, self.config.connect_timeout).await;
                return Err(ConnError::DeadlineExceeded);
            }
        };

        Ok(ManagedConnection::new(
            session,
            version,
            endpoint.user(),
            endpoint.addr(),
            self.config.call_timeout,
            self.epoch,
        ))
    }

    /// Run one idle scan now. Returns the number of evicted connections.
    pub async fn reap_idle(&self) -> usize {
        self.registry.close_unused().await
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.len().await
    }

    pub async fn contains(&self, endpoint: &Endpoint) -> bool {
        self.registry.contains(endpoint).await
    }

    /// Log one line per cached connection at `info` level.
    pub async fn log_stats(&self) {
        self.registry.log_stats().await;
    }

    /// Stop the housekeeper and close every cached connection.
    ///
    /// Waits for an in-flight `get_or_create` to finish first. Later calls
    /// to `get_or_create` fail with [`ConnError::ManagerShutdown`]. Calling
    /// this more than once is a no-op.
    pub async fn shutdown(&self) {
        let _guard = self.create_lock.lock().await;
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shutdown_tx.send_replace(true);

        let handle = self.housekeeper.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "housekeeper task failed");
            }
        }

        // Covers a housekeeper that died before draining.
        let closed = self.registry.close_all().await;
        if closed > 0 {
            debug!(closed, "closed remaining connections");
        }
        info!("connection manager shut down");
    }
}

/// Close a session that never made it into the registry.
async fn discard(endpoint: &Endpoint, session: Box<dyn Session>, timeout: Duration) {
    match tokio::time::timeout(timeout, session.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(endpoint = %endpoint, error = %e, "failed to close half-open session"),
        Err(_) => warn!(endpoint = %endpoint, ?timeout, "timed out closing half-open session"),
    }
}

impl Drop for ConnManager {
    fn drop(&mut self) {
        // The housekeeper drains the registry once it sees the signal.
        self.shutdown_tx.send_replace(true);
    }
}

impl std::fmt::Debug for ConnManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnManager")
            .field("config", &self.config)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}
