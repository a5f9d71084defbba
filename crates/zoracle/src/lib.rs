//! zoracle — database monitoring metrics over cached connections.
//!
//! Two metrics are exported:
//! - `zoracle.ping`: `1` when the server answers `SELECT 1 FROM DUAL`,
//!   `0` otherwise, or the server's `ORA-NNNNN` message when the
//!   connection itself is refused
//! - `zoracle.custom.query`: the rows of a user query as a JSON array
//!
//! Connections come from [`zoracle_conn::ConnManager`], one per
//! endpoint and reused across exports until idle past `keep_alive`.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod plugin;

pub use config::{PluginOptions, SessionConfig};
pub use error::PluginError;
pub use metrics::{Metric, MetricValue};
pub use plugin::Plugin;
