//! In-memory driver for tests.
//!
//! [`MockFactory`] opens [`MockSession`]s built from a template and counts
//! opens and closes. Latency, hangs and failures are programmable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::driver::{ConnectDescriptor, ConnectionFactory, DriverError, Rows, ServerVersion, Session};

/// Shared counter handed out by mocks for assertions.
#[derive(Clone, Debug, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn incr(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

async fn pause(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

/// A scripted session.
#[derive(Clone, Debug)]
pub struct MockSession {
    results: HashMap<String, Rows>,
    query_error: Option<DriverError>,
    negotiate_error: Option<DriverError>,
    close_error: Option<DriverError>,
    query_latency: Duration,
    negotiate_latency: Duration,
    hang: bool,
    closed: Arc<AtomicBool>,
    queries: Counter,
    closes: Counter,
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSession {
    pub fn new() -> Self {
        Self {
            results: HashMap::new(),
            query_error: None,
            negotiate_error: None,
            close_error: None,
            query_latency: Duration::ZERO,
            negotiate_latency: Duration::ZERO,
            hang: false,
            closed: Arc::new(AtomicBool::new(false)),
            queries: Counter::default(),
            closes: Counter::default(),
        }
    }

    /// Answer `statement` with `rows`. Unknown statements return no rows.
    pub fn with_result(mut self, statement: &str, rows: Rows) -> Self {
        self.results.insert(statement.to_string(), rows);
        self
    }

    pub fn failing_queries(mut self, err: impl Into<DriverError>) -> Self {
        self.query_error = Some(err.into());
        self
    }

    pub fn failing_negotiation(mut self, err: impl Into<DriverError>) -> Self {
        self.negotiate_error = Some(err.into());
        self
    }

    pub fn failing_close(mut self, err: impl Into<DriverError>) -> Self {
        self.close_error = Some(err.into());
        self
    }

    pub fn with_query_latency(mut self, latency: Duration) -> Self {
        self.query_latency = latency;
        self
    }

    pub fn with_negotiate_latency(mut self, latency: Duration) -> Self {
        self.negotiate_latency = latency;
        self
    }

    /// Queries never complete.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn query_counter(&self) -> Counter {
        self.queries.clone()
    }

    pub fn close_counter(&self) -> Counter {
        self.closes.clone()
    }
}

#[async_trait]
impl Session for MockSession {
    async fn negotiate(&self) -> Result<ServerVersion, DriverError> {
        pause(self.negotiate_latency).await;
        if let Some(err) = &self.negotiate_error {
            return Err(err.clone());
        }
        Ok(ServerVersion {
            version: 21,
            release: 3,
            banner: "Oracle Database 21c Express Edition Release 21.0.0.0.0".to_string(),
            ..Default::default()
        })
    }

    async fn query(&self, statement: &str, _args: &[String]) -> Result<Rows, DriverError> {
        self.queries.incr();
        if self.hang {
            std::future::pending::<()>().await;
        }
        pause(self.query_latency).await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Other("session is closed".to_string()));
        }
        if let Some(err) = &self.query_error {
            return Err(err.clone());
        }
        Ok(self
            .results
            .get(statement)
            .cloned()
            .unwrap_or_else(|| Rows::new(Vec::<String>::new())))
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.closes.incr();
        self.closed.store(true, Ordering::SeqCst);
        match &self.close_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Opens sessions cloned from a template session.
#[derive(Debug)]
pub struct MockFactory {
    template: MockSession,
    open_error: Mutex<Option<DriverError>>,
    open_latency: Duration,
    hang: bool,
    opens: Counter,
    queries: Counter,
    closes: Counter,
    descriptors: Mutex<Vec<ConnectDescriptor>>,
}

impl Default for MockFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFactory {
    pub fn new() -> Self {
        Self::with_session(MockSession::new())
    }

    /// Every opened session is a copy of `template` with fresh state.
    pub fn with_session(template: MockSession) -> Self {
        Self {
            template,
            open_error: Mutex::new(None),
            open_latency: Duration::ZERO,
            hang: false,
            opens: Counter::default(),
            queries: Counter::default(),
            closes: Counter::default(),
            descriptors: Mutex::new(Vec::new()),
        }
    }

    pub fn with_open_latency(mut self, latency: Duration) -> Self {
        self.open_latency = latency;
        self
    }

    /// Opens never complete.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Make subsequent opens fail with `err`, or succeed again with `None`.
    pub fn fail_opens(&self, err: Option<DriverError>) {
        *self.open_error.lock().unwrap_or_else(PoisonError::into_inner) = err;
    }

    /// Sessions successfully opened so far.
    pub fn opens(&self) -> usize {
        self.opens.get()
    }

    /// Queries across every session this factory opened.
    pub fn queries(&self) -> usize {
        self.queries.get()
    }

    /// Close calls across every session this factory opened.
    pub fn closes(&self) -> usize {
        self.closes.get()
    }

    /// Descriptors passed to every open attempt, in order.
    pub fn descriptors(&self) -> Vec<ConnectDescriptor> {
        self.descriptors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn open(&self, descriptor: &ConnectDescriptor) -> Result<Box<dyn Session>, DriverError> {
        self.descriptors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(descriptor.clone());

        if self.hang {
            std::future::pending::<()>().await;
        }
        pause(self.open_latency).await;

        let failure = self
            .open_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(err) = failure {
            return Err(err);
        }

        self.opens.incr();
        let session = MockSession {
            closed: Arc::new(AtomicBool::new(false)),
            queries: self.queries.clone(),
            closes: self.closes.clone(),
            ..self.template.clone()
        };
        Ok(Box::new(session))
    }
}
