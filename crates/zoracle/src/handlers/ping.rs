use regex::Regex;
use serde_json::Value;
use tracing::debug;
use zoracle_conn::{CallContext, ConnError, ManagedConnection};

use crate::metrics::MetricValue;

pub const PING_OK: i64 = 1;
pub const PING_FAILED: i64 = 0;
pub const PING_QUERY: &str = "SELECT 1 FROM DUAL";

/// `PING_OK` when the server answers `1`, `PING_FAILED` otherwise.
/// Query failures are a failed ping, never an error.
pub async fn ping(conn: &ManagedConnection, ctx: &CallContext) -> MetricValue {
    let alive = match conn.query_row(ctx, PING_QUERY, &[]).await {
        Ok(row) => row.get(0).and_then(as_int) == Some(PING_OK),
        Err(err) => {
            debug!(addr = conn.addr(), error = %err, "ping query failed");
            false
        }
    };
    MetricValue::Int(if alive { PING_OK } else { PING_FAILED })
}

/// Ping result for a connection that could not be obtained: the server's
/// `ORA-NNNNN` message when there is one, `PING_FAILED` otherwise.
pub fn connection_failure(err: &ConnError) -> MetricValue {
    let text = err.to_string();
    match Regex::new(r"ORA-[0-9]{5}.*")
        .ok()
        .and_then(|re| re.find(&text).map(|m| m.as_str().to_string()))
    {
        Some(native) => MetricValue::Text(native),
        None => MetricValue::Int(PING_FAILED),
    }
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
