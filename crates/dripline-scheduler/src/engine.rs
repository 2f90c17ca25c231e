//! Built-in interval loop for deployments without an external cron.
//! Ticks with `tokio::time::interval`, sleeping between polls.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::poller::Poller;

/// Run `poller` every `interval_secs` seconds, forever.
///
/// A slow cycle delays the next tick instead of bursting to catch up, so at
/// most one poll runs at a time.
pub async fn spawn_poller(poller: Arc<Poller>, interval_secs: u64) {
    let interval_secs = interval_secs.max(1);
    tracing::info!("⏰ Marketing poller started (every {interval_secs}s)");

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let report = poller.poll_once().await;
        if report.errors > 0 {
            tracing::warn!("⚠️ Poll finished with {} errors", report.errors);
        }
    }
}
