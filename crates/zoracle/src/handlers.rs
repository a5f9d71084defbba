//! Metric handlers. Each one runs against an already-resolved connection.

mod custom_query;
mod ping;

use zoracle_conn::{CallContext, ManagedConnection};

use crate::error::PluginError;
use crate::metrics::{Metric, MetricValue, Params};

pub use custom_query::custom_query;
pub use ping::{PING_FAILED, PING_OK, PING_QUERY, connection_failure, ping};

/// Dispatch `metric` to its handler.
pub async fn handle(
    metric: Metric,
    conn: &ManagedConnection,
    ctx: &CallContext,
    params: &Params,
) -> Result<MetricValue, PluginError> {
    match metric {
        Metric::Ping => Ok(ping(conn, ctx).await),
        Metric::CustomQuery => {
            let query = params.query.as_deref().ok_or_else(|| {
                PluginError::InvalidParams("missing required parameter Query".to_string())
            })?;
            custom_query(conn, ctx, query, &params.extra).await
        }
    }
}
