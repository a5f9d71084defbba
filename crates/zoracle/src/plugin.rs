//! Plugin lifecycle and metric export.
//!
//! `start()` builds a connection manager from the options, `stop()` shuts
//! it down. Between the two, `export()` resolves item parameters to an
//! endpoint, fetches the cached connection and runs the metric handler
//! under the configured call timeout.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use zoracle_conn::{ConnManager, ConnectionFactory};

use crate::config::PluginOptions;
use crate::error::PluginError;
use crate::handlers;
use crate::metrics::{self, Metric, MetricValue};

pub const PLUGIN_NAME: &str = "zoracle";

pub struct Plugin {
    options: PluginOptions,
    factory: Arc<dyn ConnectionFactory>,
    manager: Option<ConnManager>,
}

impl Plugin {
    pub fn new(options: PluginOptions, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            options,
            factory,
            manager: None,
        }
    }

    pub fn options(&self) -> &PluginOptions {
        &self.options
    }

    pub fn is_running(&self) -> bool {
        self.manager.is_some()
    }

    /// Create a fresh connection manager. Must be called from within a Tokio
    /// runtime; a manager left over from a previous `start()` is replaced.
    pub fn start(&mut self) {
        let config = self.options.manager_config();
        info!(
            plugin = PLUGIN_NAME,
            keep_alive = ?config.keep_alive,
            connect_timeout = ?config.connect_timeout,
            call_timeout = ?config.call_timeout,
            sessions = self.options.sessions.len(),
            "starting plugin"
        );
        if self.manager.is_some() {
            // Dropping the old manager signals its housekeeper to drain.
            warn!(plugin = PLUGIN_NAME, "plugin already started, replacing connection manager");
        }
        self.manager = Some(ConnManager::new(config, Arc::clone(&self.factory)));
    }

    /// Shut the manager down and close every cached connection.
    pub async fn stop(&mut self) {
        if let Some(manager) = self.manager.take() {
            manager.shutdown().await;
            info!(plugin = PLUGIN_NAME, "plugin stopped");
        }
    }

    /// Evaluate the metric `key` with raw item parameters.
    pub async fn export(&self, key: &str, raw_params: &[String]) -> Result<MetricValue, PluginError> {
        let result = self.try_export(key, raw_params).await;
        if let Err(e) = &result {
            error!(plugin = PLUGIN_NAME, key, error = %e, "export failed");
        }
        result
    }

    async fn try_export(&self, key: &str, raw_params: &[String]) -> Result<MetricValue, PluginError> {
        let metric = Metric::from_key(key)?;
        let params = metrics::eval_params(metric, raw_params, &self.options.sessions)?;
        let endpoint = params.conn.endpoint()?;
        let manager = self.manager.as_ref().ok_or(PluginError::NotStarted)?;

        let conn = match manager.get_or_create(&endpoint).await {
            Ok(conn) => conn,
            // A ping reports unreachable servers as a value, not an error.
            Err(e) if metric == Metric::Ping => {
                debug!(endpoint = %endpoint, error = %e, "ping could not connect");
                return Ok(handlers::connection_failure(&e));
            }
            Err(e) => return Err(e.into()),
        };

        let ctx = conn.call_context();
        handlers::handle(metric, &conn, &ctx, &params).await
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("options", &self.options)
            .field("running", &self.is_running())
            .finish()
    }
}
