//! Process-local memory of whether the scan script is installed.
//!
//! Redis drops cached scripts on restart or `SCRIPT FLUSH`, so presence is
//! re-verified once the revalidation window has passed. Each process keeps
//! its own view; concurrent re-installs are idempotent.

use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::Mutex;

/// Source of "now" for the cache, injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self { now: Arc::new(Mutex::new(Instant::now())) }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

/// Tracks when the scan script was last confirmed present.
#[derive(Debug)]
pub struct ScriptCache<C: Clock = SystemClock> {
    verified_at: Mutex<Option<Instant>>,
    revalidate_after: Duration,
    clock: C,
}

impl ScriptCache<SystemClock> {
    pub fn new(revalidate_after: Duration) -> Self {
        Self::with_clock(revalidate_after, SystemClock)
    }
}

impl<C: Clock> ScriptCache<C> {
    pub fn with_clock(revalidate_after: Duration, clock: C) -> Self {
        Self {
            verified_at: Mutex::new(None),
            revalidate_after,
            clock,
        }
    }

    /// True if presence was never confirmed or the confirmation is stale.
    pub fn needs_check(&self) -> bool {
        match *self.verified_at.lock() {
            Some(at) => self.clock.now().saturating_duration_since(at) >= self.revalidate_after,
            None => true,
        }
    }

    pub fn mark_verified(&self) {
        *self.verified_at.lock() = Some(self.clock.now());
    }

    /// Forget the last confirmation (e.g. after a NOSCRIPT reply).
    pub fn invalidate(&self) {
        *self.verified_at.lock() = None;
    }
}
