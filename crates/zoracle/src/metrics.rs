//! Metric keys and parameter evaluation.
//!
//! Every metric takes the common connection parameters
//! `[URI|Session][,User][,Password][,Service]`. `zoracle.custom.query`
//! additionally requires `Query` and passes anything after it to the
//! statement as positional arguments.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use zoracle_conn::Endpoint;

use crate::config::SessionConfig;
use crate::error::PluginError;

pub const KEY_PING: &str = "zoracle.ping";
pub const KEY_CUSTOM_QUERY: &str = "zoracle.custom.query";

pub const DEFAULT_URI: &str = "tcp://localhost:1521";
pub const DEFAULT_SERVICE: &str = "XE";

/// Number of common connection parameters.
const CONN_PARAMS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Ping,
    CustomQuery,
}

impl Metric {
    pub const ALL: [Metric; 2] = [Metric::Ping, Metric::CustomQuery];

    pub fn from_key(key: &str) -> Result<Self, PluginError> {
        match key {
            KEY_PING => Ok(Self::Ping),
            KEY_CUSTOM_QUERY => Ok(Self::CustomQuery),
            other => Err(PluginError::UnsupportedMetric(other.to_string())),
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::Ping => KEY_PING,
            Self::CustomQuery => KEY_CUSTOM_QUERY,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Ping => "Tests if connection is alive or not.",
            Self::CustomQuery => "Returns result of a custom query.",
        }
    }

    fn accepts_extra_params(self) -> bool {
        matches!(self, Self::CustomQuery)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Resolved connection parameters, before URI parsing.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnParams {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub service: String,
}

impl fmt::Debug for ConnParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnParams")
            .field("uri", &self.uri)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("service", &self.service)
            .finish()
    }
}

impl ConnParams {
    pub fn endpoint(&self) -> Result<Endpoint, PluginError> {
        Ok(Endpoint::parse(
            &self.uri,
            &self.user,
            &self.password,
            &self.service,
        )?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Params {
    pub conn: ConnParams,
    /// `Query` for `zoracle.custom.query`, `None` otherwise.
    pub query: Option<String>,
    /// Positional query arguments.
    pub extra: Vec<String>,
}

/// Resolve raw item parameters against defaults and configured sessions.
pub fn eval_params(
    metric: Metric,
    raw: &[String],
    sessions: &HashMap<String, SessionConfig>,
) -> Result<Params, PluginError> {
    let fixed = match metric {
        Metric::Ping => CONN_PARAMS,
        Metric::CustomQuery => CONN_PARAMS + 1,
    };
    if raw.len() > fixed && !metric.accepts_extra_params() {
        return Err(PluginError::InvalidParams(format!(
            "too many parameters for {metric}: expected at most {fixed}, got {}",
            raw.len()
        )));
    }

    let arg = |i: usize| raw.get(i).map(String::as_str).filter(|s| !s.is_empty());

    let conn = match arg(0).and_then(|name| sessions.get(name)) {
        Some(session) => ConnParams {
            uri: session.uri.clone(),
            user: pick(arg(1), &session.user, ""),
            password: pick(arg(2), &session.password, ""),
            service: pick(arg(3), &session.service, DEFAULT_SERVICE),
        },
        None => ConnParams {
            uri: arg(0).unwrap_or(DEFAULT_URI).to_string(),
            user: arg(1).unwrap_or_default().to_string(),
            password: arg(2).unwrap_or_default().to_string(),
            service: arg(3).unwrap_or(DEFAULT_SERVICE).to_string(),
        },
    };

    let (query, extra) = match metric {
        Metric::Ping => (None, Vec::new()),
        Metric::CustomQuery => {
            let query = arg(CONN_PARAMS).ok_or_else(|| {
                PluginError::InvalidParams("missing required parameter Query".to_string())
            })?;
            let extra = raw.iter().skip(fixed).cloned().collect();
            (Some(query.to_string()), extra)
        }
    };

    Ok(Params { conn, query, extra })
}

/// Explicit parameter first, then the session value, then the default.
fn pick(explicit: Option<&str>, session: &str, default: &str) -> String {
    explicit
        .or(Some(session).filter(|s| !s.is_empty()))
        .unwrap_or(default)
        .to_string()
}

/// A metric result as handed back to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Text(String),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}
