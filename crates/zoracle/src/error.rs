//! Errors surfaced by metric exports.

use zoracle_conn::{ConnError, EndpointError};

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("unsupported metric: {0}")]
    UnsupportedMetric(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("plugin is not started")]
    NotStarted,

    #[error(transparent)]
    Conn(#[from] ConnError),

    #[error("cannot marshal result: {0}")]
    Marshal(#[from] serde_json::Error),
}

impl From<EndpointError> for PluginError {
    fn from(err: EndpointError) -> Self {
        Self::Conn(ConnError::InvalidEndpoint(err))
    }
}
