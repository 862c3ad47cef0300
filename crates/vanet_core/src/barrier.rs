//! Reusable barrier for the tick phases.
//!
//! Unlike `std::sync::Barrier`, a [`PhasedGate`] can be broken by a failing
//! participant and cancelled during teardown. Either wakes every waiter with an
//! error instead of leaving it blocked forever.

use std::sync::{Condvar, Mutex, MutexGuard};

use crate::error::GateError;

#[derive(Debug)]
struct GateState {
    arrived: usize,
    generation: u64,
    broken: bool,
    cancelled: bool,
}

#[derive(Debug)]
pub struct PhasedGate {
    parties: usize,
    state: Mutex<GateState>,
    released: Condvar,
}

impl PhasedGate {
    pub fn new(parties: usize) -> Self {
        Self {
            parties: parties.max(1),
            state: Mutex::new(GateState {
                arrived: 0,
                generation: 0,
                broken: false,
                cancelled: false,
            }),
            released: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Blocks until all parties arrived. Returns `Ok(true)` for exactly one
    /// caller per generation, the one whose arrival opened the gate.
    pub fn wait(&self) -> Result<bool, GateError> {
        let mut state = self.lock();
        if state.cancelled {
            return Err(GateError::Cancelled);
        }
        if state.broken {
            return Err(GateError::Broken);
        }
        state.arrived += 1;
        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.released.notify_all();
            return Ok(true);
        }

        let generation = state.generation;
        loop {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if state.generation != generation {
                return Ok(false);
            }
            if state.cancelled {
                return Err(GateError::Cancelled);
            }
            if state.broken {
                return Err(GateError::Broken);
            }
        }
    }

    /// Marks the gate as broken; current and future waiters fail with
    /// [`GateError::Broken`].
    pub fn break_gate(&self) {
        let mut state = self.lock();
        state.broken = true;
        self.released.notify_all();
    }

    /// Fails current and future waiters with [`GateError::Cancelled`].
    pub fn cancel(&self) {
        let mut state = self.lock();
        state.cancelled = true;
        self.released.notify_all();
    }

    pub fn is_broken(&self) -> bool {
        let state = self.lock();
        state.broken || state.cancelled
    }

    /// Returns the gate to its initial state. Only valid while nobody waits.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.arrived = 0;
        state.broken = false;
        state.cancelled = false;
    }
}
