//! zoracle-conn — per-target database connection cache.
//!
//! Given an [`Endpoint`] (address, credentials, service), the
//! [`ConnManager`] hands out a live [`ManagedConnection`], creating one on
//! first use, and reclaims connections that sit idle past the keep-alive
//! window:
//! - **endpoint**: the cache key, parsed from `tcp://host:port?service=...`
//! - **driver**: the opaque session boundary (`ConnectionFactory`, `Session`)
//! - **connection**: a cached session with deadline-bound queries
//! - **manager**: get-or-create under a two-level lock, shutdown
//! - **housekeeper**: the periodic idle reaper owned by the manager
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use zoracle_conn::{ConnManager, ConnectionFactory, Endpoint, ManagerConfig};
//! # async fn demo(factory: Arc<dyn ConnectionFactory>) -> Result<(), zoracle_conn::ConnError> {
//! let manager = ConnManager::new(ManagerConfig::default(), factory);
//! let endpoint = Endpoint::parse("tcp://db:1521", "monitor", "secret", "XE")?;
//! let conn = manager.get_or_create(&endpoint).await?;
//! let ctx = conn.call_context();
//! let row = conn.query_row(&ctx, "SELECT 1 FROM DUAL", &[]).await?;
//! # drop(row);
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod driver;
pub mod endpoint;
pub mod error;
mod housekeeper;
pub mod manager;
mod registry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use connection::{CallContext, ManagedConnection};
pub use driver::{
    ConnectDescriptor, ConnectionFactory, DriverError, NativeError, Row, Rows, ServerVersion,
    Session,
};
pub use endpoint::{Endpoint, EndpointError};
pub use error::ConnError;
pub use manager::{ConnManager, ManagerConfig};
