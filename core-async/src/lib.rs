//! Async runtime facade for the shelf client core.
//!
//! Every `core-*` crate reaches the executor through this crate instead of
//! depending on Tokio for runtime primitives directly. Keeping the seam in one
//! place means the cache engine, the catalog orchestrator and the service
//! façade agree on a single notion of "now", a single task spawner and a single
//! set of synchronization primitives.
//!
//! # Modules
//!
//! - `task`: spawning background work (fetches, prefetches, sweepers)
//! - `time`: monotonic clock and sleeps; Tokio's clock so tests can pause it
//! - `sync`: async-aware locks and channels
//! - `runtime`: blocking entry point for hosts without a running executor
//!
//! # Examples
//!
//! ```rust
//! use core_async::task;
//! use core_async::time::{sleep, Duration};
//!
//! async fn example() {
//!     let handle = task::spawn(async {
//!         sleep(Duration::from_millis(5)).await;
//!         42
//!     });
//!
//!     assert_eq!(handle.await.unwrap(), 42);
//! }
//! ```

pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use task::spawn;
pub use time::{sleep, Duration, Instant};
