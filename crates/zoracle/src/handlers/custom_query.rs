use serde_json::Value;
use tracing::trace;
use zoracle_conn::{CallContext, ManagedConnection};

use crate::error::PluginError;
use crate::metrics::MetricValue;

/// Run a user query and render every row as a JSON object, column name to
/// value. The result is a JSON array, `[]` when nothing matched.
pub async fn custom_query(
    conn: &ManagedConnection,
    ctx: &CallContext,
    query: &str,
    args: &[String],
) -> Result<MetricValue, PluginError> {
    let rows = conn.query(ctx, query, args).await?;
    trace!(rows = rows.len(), columns = rows.columns().len(), "custom query returned");

    let data: Vec<Value> = rows
        .iter()
        .map(|row| Value::Object(row.to_json_object()))
        .collect();
    Ok(MetricValue::Text(serde_json::to_string(&data)?))
}
