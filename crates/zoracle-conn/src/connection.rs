//! Managed connection — one cached session plus its usage metadata.
//!
//! Callers receive an `Arc<ManagedConnection>` from the manager and must
//! drop it when their request is done. The housekeeper may close the
//! session of an entry whose recorded access is stale even while a caller
//! still runs a query on it: recency is stamped at lookup, not when a query
//! completes. Such a query observes [`ConnError::Cancelled`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::driver::{DriverError, Row, Rows, ServerVersion, Session};
use crate::error::ConnError;

/// Deadline-bound call context.
///
/// Carries an absolute deadline and a cancellation signal tied to the
/// lifetime of the connection it was derived from.
#[derive(Clone, Debug)]
pub struct CallContext {
    deadline: Instant,
    cancel: watch::Receiver<bool>,
}

impl CallContext {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// A context with a deadline no later than `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            deadline: self.deadline.min(Instant::now() + timeout),
            cancel: self.cancel.clone(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// The error the context itself reports, if it is done.
    pub fn err(&self) -> Option<ConnError> {
        if self.is_cancelled() {
            Some(ConnError::Cancelled)
        } else if self.is_expired() {
            Some(ConnError::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Resolves once the parent connection is closed.
    async fn cancelled(&self) {
        let mut cancel = self.cancel.clone();
        // A dropped sender means the connection itself is gone.
        let _ = cancel.wait_for(|closed| *closed).await;
    }

    /// Run a driver call bound to this context. Once the context is done,
    /// its own error wins over whatever the driver reported.
    async fn run<T, F>(&self, call: F) -> Result<T, ConnError>
    where
        F: Future<Output = Result<T, DriverError>>,
    {
        let result = tokio::select! {
            biased;
            _ = self.cancelled() => return Err(ConnError::Cancelled),
            res = tokio::time::timeout_at(self.deadline, call) => res,
        };

        match result {
            Err(_elapsed) => Err(ConnError::DeadlineExceeded),
            Ok(res) => {
                if let Some(err) = self.err() {
                    return Err(err);
                }
                res.map_err(ConnError::QueryFailed)
            }
        }
    }
}

/// A cached live session.
#[derive(Debug)]
pub struct ManagedConnection {
    session: Box<dyn Session>,
    call_timeout: Duration,
    version: ServerVersion,
    username: String,
    addr: String,
    /// Reference point for `last_access_nanos`.
    epoch: Instant,
    last_access_nanos: AtomicU64,
    /// Parent of every call context; flipped to `true` on close.
    closed: watch::Sender<bool>,
}

impl ManagedConnection {
    pub(crate) fn new(
        session: Box<dyn Session>,
        version: ServerVersion,
        username: &str,
        addr: String,
        call_timeout: Duration,
        epoch: Instant,
    ) -> Self {
        let conn = Self {
            session,
            call_timeout,
            version,
            username: username.to_string(),
            addr,
            epoch,
            last_access_nanos: AtomicU64::new(0),
            closed: watch::Sender::new(false),
        };
        conn.touch();
        conn
    }

    /// A fresh call context bounded by the configured call timeout.
    pub fn call_context(&self) -> CallContext {
        CallContext {
            deadline: Instant::now() + self.call_timeout,
            cancel: self.closed.subscribe(),
        }
    }

    /// Execute a read query within `ctx`.
    pub async fn query(
        &self,
        ctx: &CallContext,
        statement: &str,
        args: &[String],
    ) -> Result<Rows, ConnError> {
        ctx.run(self.session.query(statement, args)).await
    }

    /// Execute a query expected to produce at least one row, returning the first.
    pub async fn query_row(
        &self,
        ctx: &CallContext,
        statement: &str,
        args: &[String],
    ) -> Result<Row, ConnError> {
        self.query(ctx, statement, args)
            .await?
            .into_iter()
            .next()
            .ok_or(ConnError::EmptyResult)
    }

    /// The authenticated principal.
    pub fn identity(&self) -> &str {
        &self.username
    }

    /// `host:port` of the server this session is attached to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn server_version(&self) -> &ServerVersion {
        &self.version
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn last_access(&self) -> Instant {
        self.epoch + Duration::from_nanos(self.last_access_nanos.load(Ordering::Acquire))
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Mark as just accessed. Never moves the timestamp backwards.
    pub(crate) fn touch(&self) {
        let nanos = Instant::now().duration_since(self.epoch).as_nanos() as u64;
        self.last_access_nanos.fetch_max(nanos, Ordering::AcqRel);
    }

    pub(crate) fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_access())
    }

    /// Cancel in-flight calls and close the session. Failures are logged only.
    pub(crate) async fn close(&self, timeout: Duration) {
        self.closed.send_replace(true);
        match tokio::time::timeout(timeout, self.session.close()).await {
            Ok(Ok(())) => debug!(endpoint = %self.addr, "session closed"),
            Ok(Err(e)) => warn!(endpoint = %self.addr, error = %e, "failed to close session"),
            Err(_) => warn!(endpoint = %self.addr, ?timeout, "timed out closing session"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::NativeError;
    use crate::testing::MockSession;
    use serde_json::json;
    use std::sync::Arc;

    fn conn(session: MockSession, call_timeout: Duration) -> ManagedConnection {
        ManagedConnection::new(
            Box::new(session),
            ServerVersion::default(),
            "alice",
            "h:1521".to_string(),
            call_timeout,
            Instant::now(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn query_returns_rows() {
        let session = MockSession::new()
            .with_result("SELECT 1 FROM DUAL", Rows::new(["1"]).with_row(vec![json!(1)]));
        let conn = conn(session, Duration::from_secs(5));
        let ctx = conn.call_context();

        let rows = conn.query(&ctx, "SELECT 1 FROM DUAL", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_error_becomes_query_failed() {
        let session = MockSession::new().failing_queries(NativeError::new(942, "table or view does not exist"));
        let conn = conn(session, Duration::from_secs(5));
        let ctx = conn.call_context();

        let err = conn.query(&ctx, "SELECT * FROM nope", &[]).await.unwrap_err();
        assert_eq!(err.native().map(|n| n.code), Some(942));
        assert!(matches!(err, ConnError::QueryFailed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_query_hits_deadline() {
        let conn = conn(MockSession::new().hanging(), Duration::from_secs(1));
        let ctx = conn.call_context();
        let started = Instant::now();

        let err = conn.query(&ctx, "SELECT 1 FROM DUAL", &[]).await.unwrap_err();

        assert_eq!(err, ConnError::DeadlineExceeded);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_failing_query_reports_deadline() {
        // The driver would fail, but only after the deadline has passed.
        let session = MockSession::new()
            .with_query_latency(Duration::from_secs(2))
            .failing_queries(NativeError::new(1013, "user requested cancel"));
        let conn = conn(session, Duration::from_secs(1));
        let ctx = conn.call_context();

        let err = conn.query(&ctx, "SELECT 1 FROM DUAL", &[]).await.unwrap_err();
        assert_eq!(err, ConnError::DeadlineExceeded);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_context_fails_fast() {
        let conn = conn(MockSession::new(), Duration::from_secs(5));
        let ctx = conn.call_context().with_timeout(Duration::ZERO);
        let err = conn.query(&ctx, "SELECT 1 FROM DUAL", &[]).await.unwrap_err();
        assert_eq!(err, ConnError::DeadlineExceeded);
    }

    #[tokio::test(start_paused = true)]
    async fn query_row_on_empty_result() {
        let session = MockSession::new().with_result("SELECT x FROM t", Rows::new(["X"]));
        let conn = conn(session, Duration::from_secs(5));
        let ctx = conn.call_context();

        let err = conn.query_row(&ctx, "SELECT x FROM t", &[]).await.unwrap_err();
        assert_eq!(err, ConnError::EmptyResult);
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_in_flight_query() {
        let session = MockSession::new().hanging();
        let closes = session.close_counter();
        let conn = Arc::new(conn(session, Duration::from_secs(60)));
        let ctx = conn.call_context();

        let running = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.query(&ctx, "SELECT 1 FROM DUAL", &[]).await })
        };
        tokio::task::yield_now().await;

        conn.close(Duration::from_secs(1)).await;
        let err = running.await.unwrap().unwrap_err();

        assert_eq!(err, ConnError::Cancelled);
        assert!(conn.is_closed());
        assert_eq!(closes.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn touch_is_monotonic() {
        let conn = conn(MockSession::new(), Duration::from_secs(5));
        let first = conn.last_access();

        tokio::time::advance(Duration::from_secs(3)).await;
        conn.touch();
        let second = conn.last_access();

        assert!(second > first);
        assert_eq!(conn.idle_for(Instant::now()), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn with_timeout_never_extends_deadline() {
        let conn = conn(MockSession::new(), Duration::from_secs(1));
        let ctx = conn.call_context();
        let widened = ctx.with_timeout(Duration::from_secs(60));
        assert_eq!(widened.deadline(), ctx.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn identity_is_username() {
        let conn = conn(MockSession::new(), Duration::from_secs(5));
        assert_eq!(conn.identity(), "alice");
        assert_eq!(conn.addr(), "h:1521");
    }
}
