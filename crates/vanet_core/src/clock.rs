//! Simulated clock: fixed-size ticks and the published simulation time.

use std::sync::atomic::{AtomicU64, Ordering};

/// Simulated time advanced by one tick, in ms.
pub const TICK_MS: u64 = 40;

pub const ONE_SEC_MS: u64 = 1000;

/// Published simulation time.
///
/// Only the tick coordinator advances it, after every worker finished the
/// tick, so readers never observe a time whose tick is still in progress.
#[derive(Debug, Default)]
pub struct SimClock {
    now: AtomicU64,
}

impl SimClock {
    pub fn now(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }

    /// Time the next tick will publish.
    pub fn next_tick(&self) -> u64 {
        self.now() + TICK_MS
    }

    pub fn publish(&self, time: u64) {
        debug_assert!(time >= self.now(), "published time must not go backwards");
        self.now.store(time, Ordering::Release);
    }

    pub fn reset(&self) {
        self.now.store(0, Ordering::Release);
    }
}

/// Whole ticks needed to reach `target` from `now`.
pub fn ticks_until(now: u64, target: u64) -> u64 {
    target.saturating_sub(now).div_ceil(TICK_MS)
}
