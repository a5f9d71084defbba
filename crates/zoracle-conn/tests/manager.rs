//! Connection manager behavior under concurrency, idle reaping and shutdown.
//!
//! The stack under test: `ConnManager` → `MockFactory` → `MockSession`,
//! with Tokio's clock paused so keep-alive and deadline timing is exact.

use std::sync::{Arc, Once};
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use zoracle_conn::testing::{MockFactory, MockSession};
use zoracle_conn::{ConnError, ConnManager, Endpoint, ManagerConfig, Rows};

static TRACING_INIT: Once = Once::new();

/// Controlled by `RUST_LOG` (e.g. `RUST_LOG=zoracle_conn=debug`).
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

fn config() -> ManagerConfig {
    ManagerConfig {
        keep_alive: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(3),
        call_timeout: Duration::from_secs(1),
        housekeeping_interval: Duration::from_secs(1),
    }
}

fn manager(config: ManagerConfig, factory: MockFactory) -> (Arc<ConnManager>, Arc<MockFactory>) {
    init_tracing();
    let factory = Arc::new(factory);
    let manager = Arc::new(ConnManager::new(config, factory.clone()));
    (manager, factory)
}

fn endpoint(host: &str, user: &str) -> Endpoint {
    Endpoint::parse(&format!("tcp://{host}:1521"), user, "secret", "XE").unwrap()
}

// ── Get-or-create ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn scenario_alice_on_xe() {
    let (mgr, factory) = manager(config(), MockFactory::new());
    let id = Endpoint::parse("tcp://h:1521", "alice", "pw", "XE").unwrap();

    let first = mgr.get_or_create(&id).await.unwrap();
    assert_eq!(first.identity(), "alice");
    assert_eq!(factory.opens(), 1);
    let stamped = first.last_access();
    drop(first);

    tokio::time::advance(Duration::from_secs(2)).await;
    let again = Endpoint::parse("tcp://h:1521", "alice", "pw", "XE").unwrap();
    let second = mgr.get_or_create(&again).await.unwrap();

    assert_eq!(factory.opens(), 1);
    assert!(second.last_access() > stamped);
}

#[tokio::test(start_paused = true)]
async fn concurrent_first_requests_dial_once() {
    let factory = MockFactory::new().with_open_latency(Duration::from_millis(200));
    let (mgr, factory) = manager(config(), factory);
    let id = endpoint("h", "alice");

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let mgr = Arc::clone(&mgr);
        let id = id.clone();
        tasks.push(tokio::spawn(async move { mgr.get_or_create(&id).await }));
    }

    let mut conns = Vec::new();
    for task in tasks {
        conns.push(task.await.unwrap().unwrap());
    }

    assert_eq!(factory.opens(), 1);
    assert!(conns.iter().all(|c| Arc::ptr_eq(c, &conns[0])));
    assert_eq!(mgr.connection_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn distinct_endpoints_get_distinct_connections() {
    let (mgr, factory) = manager(config(), MockFactory::new());

    let (ep_a, ep_b) = (endpoint("a", "alice"), endpoint("b", "bob"));
    let (a, b) = tokio::join!(mgr.get_or_create(&ep_a), mgr.get_or_create(&ep_b));

    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(a.identity(), "alice");
    assert_eq!(b.identity(), "bob");
    assert_eq!(factory.opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn queries_are_not_blocked_by_another_endpoints_setup() {
    let session = MockSession::new().with_result("SELECT 1 FROM DUAL", Rows::new(["1"]).with_row(vec![json!(1)]));
    let factory = MockFactory::with_session(session).with_open_latency(Duration::from_secs(2));
    let (mgr, _) = manager(config(), factory);

    let a = mgr.get_or_create(&endpoint("a", "alice")).await.unwrap();

    // Creation of `b` holds the outer lock for two seconds.
    let slow = {
        let mgr = Arc::clone(&mgr);
        tokio::spawn(async move {
            mgr.get_or_create(&endpoint("b", "bob")).await.unwrap();
            Instant::now()
        })
    };
    tokio::task::yield_now().await;

    let ctx = a.call_context();
    let started = Instant::now();
    a.query_row(&ctx, "SELECT 1 FROM DUAL", &[]).await.unwrap();
    let query_done = Instant::now();

    let created = slow.await.unwrap();
    assert!(query_done.duration_since(started) < Duration::from_millis(100));
    assert!(created > query_done);
}

// ── Deadlines and cancellation ──────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn query_against_silent_session_times_out() {
    let (mgr, _) = manager(config(), MockFactory::with_session(MockSession::new().hanging()));
    let conn = mgr.get_or_create(&endpoint("h", "alice")).await.unwrap();

    let ctx = conn.call_context();
    let started = Instant::now();
    let err = conn.query(&ctx, "SELECT 1 FROM DUAL", &[]).await.unwrap_err();

    assert_eq!(err, ConnError::DeadlineExceeded);
    assert!(started.elapsed() < Duration::from_millis(1100));
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_in_flight_queries() {
    let config = ManagerConfig {
        call_timeout: Duration::from_secs(60),
        ..config()
    };
    let (mgr, factory) = manager(config, MockFactory::with_session(MockSession::new().hanging()));
    let conn = mgr.get_or_create(&endpoint("h", "alice")).await.unwrap();

    let running = tokio::spawn(async move {
        let ctx = conn.call_context();
        conn.query(&ctx, "SELECT 1 FROM DUAL", &[]).await
    });
    tokio::task::yield_now().await;

    let started = Instant::now();
    mgr.shutdown().await;
    let err = running.await.unwrap().unwrap_err();

    assert_eq!(err, ConnError::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(factory.closes(), 1);
}

// ── Housekeeping ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn housekeeper_evicts_only_idle_connections() {
    let (mgr, factory) = manager(config(), MockFactory::new());
    let busy = endpoint("busy", "alice");
    let idle = endpoint("idle", "bob");

    mgr.get_or_create(&busy).await.unwrap();
    mgr.get_or_create(&idle).await.unwrap();

    // Keep `busy` warm every 3s; `idle` is never looked up again.
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_secs(3)).await;
        mgr.get_or_create(&busy).await.unwrap();
    }

    assert!(mgr.contains(&busy).await);
    assert!(!mgr.contains(&idle).await);
    assert_eq!(factory.opens(), 2);
    assert_eq!(factory.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn evicted_endpoint_is_recreated_on_next_request() {
    let (mgr, factory) = manager(config(), MockFactory::new());
    let id = endpoint("h", "alice");

    let first = mgr.get_or_create(&id).await.unwrap();
    tokio::time::sleep(Duration::from_secs(7)).await;
    assert!(first.is_closed());
    assert_eq!(mgr.connection_count().await, 0);

    let second = mgr.get_or_create(&id).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(!second.is_closed());
    assert_eq!(factory.opens(), 2);
}

/// Recency is stamped at lookup, not at query completion, so a query that
/// outlives the keep-alive window loses its connection to the housekeeper.
#[tokio::test(start_paused = true)]
async fn long_query_does_not_protect_connection_from_eviction() {
    let config = ManagerConfig {
        call_timeout: Duration::from_secs(30),
        ..config()
    };
    let session = MockSession::new().with_query_latency(Duration::from_secs(20));
    let (mgr, _) = manager(config, MockFactory::with_session(session));
    let conn = mgr.get_or_create(&endpoint("h", "alice")).await.unwrap();

    let ctx = conn.call_context();
    let started = Instant::now();
    let err = conn.query(&ctx, "SELECT slow FROM t", &[]).await.unwrap_err();

    assert_eq!(err, ConnError::Cancelled);
    // First tick past the 5s keep-alive window.
    assert_eq!(started.elapsed(), Duration::from_secs(6));
    assert_eq!(mgr.connection_count().await, 0);
}

// ── Shutdown ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn shutdown_drains_and_refuses_further_requests() {
    let (mgr, factory) = manager(config(), MockFactory::new());
    for host in ["a", "b", "c"] {
        mgr.get_or_create(&endpoint(host, "alice")).await.unwrap();
    }

    mgr.shutdown().await;

    assert_eq!(mgr.connection_count().await, 0);
    assert_eq!(factory.closes(), 3);
    assert_eq!(
        mgr.get_or_create(&endpoint("a", "alice")).await.unwrap_err(),
        ConnError::ManagerShutdown
    );
    assert_eq!(factory.opens(), 3);
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_in_flight_creation() {
    let factory = MockFactory::new().with_open_latency(Duration::from_secs(1));
    let (mgr, factory) = manager(config(), factory);

    let creating = {
        let mgr = Arc::clone(&mgr);
        tokio::spawn(async move { mgr.get_or_create(&endpoint("h", "alice")).await })
    };
    tokio::task::yield_now().await;

    mgr.shutdown().await;

    let conn = creating.await.unwrap().unwrap();
    assert!(conn.is_closed());
    assert_eq!(factory.opens(), 1);
    assert_eq!(factory.closes(), 1);
    assert_eq!(mgr.connection_count().await, 0);
}
