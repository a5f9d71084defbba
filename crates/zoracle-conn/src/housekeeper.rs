//! Housekeeper — background task that reclaims idle connections.
//!
//! One task per manager. It waits on whichever comes first: the next tick
//! (run one idle scan) or the shutdown signal (close everything and exit).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::registry::Registry;

pub(crate) fn spawn(
    registry: Arc<Registry>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run(registry, interval, shutdown))
}

async fn run(registry: Arc<Registry>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    // First scan one full interval after start, like a plain ticker.
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(?interval, "housekeeper started");

    loop {
        tokio::select! {
            // An Err here means the manager was dropped: stop as well.
            _ = async { drop(shutdown.wait_for(|stop| *stop).await) } => break,
            _ = ticker.tick() => {
                registry.close_unused().await;
            }
        }
    }

    let closed = registry.close_all().await;
    debug!(closed, "housekeeper stopped");
}
