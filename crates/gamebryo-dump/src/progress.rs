//! Shared atomic progress counter and cancellation token for parallel scans.
//!
//! Workers increment the counter atomically; consumers poll it on a timer to
//! drive progress displays without coupling the core library to any UI. The
//! cancellation token is checked at coarse boundaries (between region groups
//! and between analysis phases) -- in-progress struct reads are never
//! interrupted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Thread-safe progress counter shared between rayon workers and a poller.
pub type ProgressCounter = Arc<AtomicU64>;

/// Create a new zero-initialized progress counter.
pub fn new_counter() -> ProgressCounter {
    Arc::new(AtomicU64::new(0))
}

/// Increment the counter by one (called by a worker after completing a unit).
#[inline]
pub fn tick(counter: &ProgressCounter) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Cooperative cancellation flag threaded through the orchestrator.
pub type CancelToken = Arc<AtomicBool>;

/// Create a new (unset) cancellation token.
pub fn new_cancel_token() -> CancelToken {
    Arc::new(AtomicBool::new(false))
}

/// Request cancellation. Workers observe it before starting the next region
/// group; worst-case latency is one region group.
#[inline]
pub fn cancel(token: &CancelToken) {
    token.store(true, Ordering::Relaxed);
}

#[inline]
pub fn is_cancelled(token: &CancelToken) -> bool {
    token.load(Ordering::Relaxed)
}
