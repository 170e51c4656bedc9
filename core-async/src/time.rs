//! Time-related abstractions.
//!
//! `Instant` is Tokio's monotonic instant rather than `std`'s: it follows the
//! runtime clock, so `tokio::time::pause`/`advance` in tests move staleness
//! windows, retention deadlines and retry backoff deterministically.
//!
//! # Examples
//!
//! ```rust
//! use core_async::time::{sleep, Duration, Instant};
//!
//! async fn example() {
//!     let start = Instant::now();
//!     sleep(Duration::from_millis(10)).await;
//!     assert!(start.elapsed() >= Duration::from_millis(10));
//! }
//! ```

pub use std::time::{Duration, SystemTime, UNIX_EPOCH};
pub use tokio::time::{interval, sleep, timeout, Instant, Interval, MissedTickBehavior};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
