//! Shared helpers for integration tests: a scripted transfer client, a
//! recording messaging surface and fast engine timings.
#![allow(dead_code)]

pub mod scripted;
pub mod surface;

use std::time::Duration;
use teleflux_core::config::Timings;

/// Millisecond-scale timings so flows finish quickly in real time.
pub fn fast_timings(limit: usize) -> Timings {
    Timings {
        max_concurrent: limit,
        stall_timeout: Duration::from_millis(400),
        watchdog_interval: Duration::from_millis(20),
        cleanup_delay: Duration::from_millis(150),
        publish_min_interval: Duration::from_millis(10),
        publish_retry_delay: Duration::from_millis(20),
        final_refresh_delay: Duration::from_millis(10),
        completed_grace: Duration::from_millis(60),
        failed_grace: Duration::from_millis(80),
        history_limit: 30,
        history_shown: 5,
    }
}

/// Poll `cond` every few milliseconds; panic after 5 seconds.
pub async fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
