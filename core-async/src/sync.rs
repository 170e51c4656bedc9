//! Synchronization primitives.
//!
//! Re-exports Tokio's async-aware primitives. Channels here carry the event
//! bus (`broadcast`) and observer state (`watch`). State that is never held
//! across an `.await`, such as the cache store, uses a synchronous lock.

pub use tokio::sync::{
    broadcast, mpsc, oneshot, watch, Mutex, MutexGuard, Notify, OwnedMutexGuard, RwLock,
    RwLockReadGuard, RwLockWriteGuard,
};
