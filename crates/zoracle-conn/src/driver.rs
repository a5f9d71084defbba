//! Driver boundary — the opaque database client the cache sits on.
//!
//! The cache never interprets wire behavior. It opens sessions through a
//! [`ConnectionFactory`], negotiates the server version once, runs queries
//! and closes sessions through [`Session`]. The only thing it inspects in a
//! driver error is whether it carries a native error code ([`NativeError`]).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::endpoint::Endpoint;

/// Client-info tag attached to every session opened by the cache.
pub const CLIENT_INFO: &str = "zbx_monitor";

/// An error reported by the database server with its native code,
/// e.g. `ORA-12541: TNS:no listener`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("ORA-{code:05}: {message}")]
pub struct NativeError {
    pub code: u32,
    pub message: String,
}

impl NativeError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Errors returned by a driver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    /// Server-side failure carrying a recognizable native code.
    #[error(transparent)]
    Native(#[from] NativeError),
    /// Any other failure (I/O, protocol, client-side).
    #[error("{0}")]
    Other(String),
}

impl DriverError {
    pub fn as_native(&self) -> Option<&NativeError> {
        match self {
            Self::Native(native) => Some(native),
            Self::Other(_) => None,
        }
    }
}

/// Driver-native connect parameters derived from an [`Endpoint`].
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectDescriptor {
    pub host: String,
    pub port: u16,
    pub service: String,
    pub username: String,
    pub password: String,
    /// Connect timeout handed to the driver.
    pub connect_timeout: Duration,
    /// Always 0: the cache never retries a dial.
    pub retry_count: u32,
    pub client_info: &'static str,
}

impl ConnectDescriptor {
    pub fn new(endpoint: &Endpoint, connect_timeout: Duration) -> Self {
        Self {
            host: endpoint.host().to_string(),
            port: endpoint.port(),
            service: endpoint.service().to_string(),
            username: endpoint.user().to_string(),
            password: endpoint.password().to_string(),
            connect_timeout,
            retry_count: 0,
            client_info: CLIENT_INFO,
        }
    }

    /// Render the TNS connect string understood by the driver.
    pub fn connect_string(&self) -> String {
        format!(
            "(DESCRIPTION=(ADDRESS=(PROTOCOL=tcp)(HOST={})(PORT={}))\
             (CONNECT_DATA=(SERVICE_NAME=\"{}\"))(CONNECT_TIMEOUT={})(RETRY_COUNT={}))",
            self.host,
            self.port,
            self.service,
            self.connect_timeout.as_secs(),
            self.retry_count,
        )
    }
}

impl fmt::Debug for ConnectDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectDescriptor")
            .field("connect_string", &self.connect_string())
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// Server version reported during negotiation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerVersion {
    pub version: u8,
    pub release: u8,
    pub update: u8,
    pub port_release: u8,
    pub port_update: u8,
    /// Full banner as reported by the server.
    pub banner: String,
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}.{}",
            self.version, self.release, self.update, self.port_release, self.port_update
        )
    }
}

/// A single result row: shared column names plus one value per column.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_by_name(&self, column: &str) -> Option<&Value> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.values.get(index)
    }

    /// Column → value object. Keys come out sorted.
    pub fn to_json_object(&self) -> Map<String, Value> {
        self.columns
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

/// A fully materialized result set.
#[derive(Clone, Debug, PartialEq)]
pub struct Rows {
    columns: Arc<[String]>,
    rows: Vec<Row>,
}

impl Rows {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::<String>::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row. Missing trailing cells are filled with `null`, extra
    /// cells are dropped.
    pub fn push(&mut self, mut values: Vec<Value>) {
        values.resize(self.columns.len(), Value::Null);
        self.rows.push(Row {
            columns: Arc::clone(&self.columns),
            values,
        });
    }

    pub fn with_row(mut self, values: Vec<Value>) -> Self {
        self.push(values);
        self
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }
}

impl IntoIterator for Rows {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a Rows {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// One live database session.
///
/// Implementations must be internally synchronized: the cache may call
/// `close` while a query is still running on another task.
#[async_trait]
pub trait Session: Send + Sync + fmt::Debug {
    /// Handshake / version negotiation, called once right after open.
    async fn negotiate(&self) -> Result<ServerVersion, DriverError>;

    /// Execute a read statement with positional arguments.
    async fn query(&self, statement: &str, args: &[String]) -> Result<Rows, DriverError>;

    /// Close the session. The cache logs and ignores failures.
    async fn close(&self) -> Result<(), DriverError>;
}

/// Opens sessions. Injected into the manager so the driver can be swapped.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn open(&self, descriptor: &ConnectDescriptor) -> Result<Box<dyn Session>, DriverError>;
}
