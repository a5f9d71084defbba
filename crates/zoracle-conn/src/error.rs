//! Error taxonomy for the connection cache.

use crate::driver::{DriverError, NativeError};
use crate::endpoint::EndpointError;

/// Errors surfaced by the connection manager and managed connections.
///
/// Nothing here is retried by the cache itself; retry is up to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnError {
    /// The endpoint descriptor could not be decoded.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(#[from] EndpointError),

    /// Dial, handshake or version negotiation failed.
    #[error("cannot establish a new connection: {source}")]
    ConnectionFailed {
        #[source]
        source: DriverError,
    },

    /// Query execution failed for a reason other than the deadline.
    #[error("cannot fetch data: {0}")]
    QueryFailed(#[source] DriverError),

    /// The bound deadline elapsed during dial, handshake or execution.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The connection was closed (evicted or shut down) while the call ran.
    #[error("call cancelled: connection closed")]
    Cancelled,

    /// A single row was expected but the result set was empty.
    #[error("cannot fetch data: empty result")]
    EmptyResult,

    /// The manager has been shut down and no longer hands out connections.
    #[error("connection manager is shut down")]
    ManagerShutdown,
}

impl ConnError {
    /// The driver-native error behind this failure, if there is one.
    pub fn native(&self) -> Option<&NativeError> {
        match self {
            Self::ConnectionFailed { source } | Self::QueryFailed(source) => source.as_native(),
            _ => None,
        }
    }

    /// Whether this error was caused by an elapsed deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::DeadlineExceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failed_exposes_native_error() {
        let err = ConnError::ConnectionFailed {
            source: NativeError::new(12541, "TNS:no listener").into(),
        };
        let native = err.native().unwrap();
        assert_eq!(native.code, 12541);
        assert_eq!(
            err.to_string(),
            "cannot establish a new connection: ORA-12541: TNS:no listener"
        );
    }

    #[test]
    fn generic_failure_has_no_native_error() {
        let err = ConnError::ConnectionFailed {
            source: DriverError::Other("connection refused".into()),
        };
        assert!(err.native().is_none());
        assert!(!err.is_timeout());
    }

    #[test]
    fn deadline_is_timeout() {
        assert!(ConnError::DeadlineExceeded.is_timeout());
        assert!(ConnError::DeadlineExceeded.native().is_none());
    }
}
