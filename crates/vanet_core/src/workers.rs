//! Persistent worker threads stepping the region grid.
//!
//! Region cells are split into contiguous runs, one per worker. A tick is a
//! round trip through three gates:
//!
//! ```text
//! coordinator: start ──────────────────────────────── finish
//! workers:     start ── phase 1 ── mid ── phase 2 ── finish
//! ```
//!
//! A panicking worker records a [`SimError::WorkerFault`] and breaks the mid
//! and finish gates, so nobody keeps waiting for it. The coordinator then
//! tears the pool down.

use std::any::Any;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, warn};

use crate::barrier::PhasedGate;
use crate::context::SimContext;
use crate::error::{GateError, SimError, SimResult};
use crate::runner::Migration;
use crate::spatial::partition;
use crate::systems::{self, communication, StepEnv};

struct Shared {
    ctx: Arc<SimContext>,
    start: PhasedGate,
    mid: PhasedGate,
    finish: PhasedGate,
    tick_time: AtomicU64,
    migrations: Mutex<Vec<Migration>>,
    faults: Mutex<Vec<SimError>>,
}

impl Shared {
    fn record_fault(&self, worker: usize, payload: Box<dyn Any + Send>) {
        let message = panic_message(payload.as_ref());
        error!(worker, message = %message, "worker faulted");
        self.faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(SimError::WorkerFault { worker, message });
        self.mid.break_gate();
        self.finish.break_gate();
    }

    fn take_fault(&self) -> Option<SimError> {
        let mut faults = self
            .faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        (!faults.is_empty()).then(|| faults.remove(0))
    }

    fn cancel(&self) {
        self.start.cancel();
        self.mid.cancel();
        self.finish.cancel();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
    assignments: Vec<Range<usize>>,
}

impl WorkerPool {
    /// Starts `workers` threads over the context's region grid.
    pub fn spawn(ctx: Arc<SimContext>, workers: usize) -> SimResult<Self> {
        let workers = workers.max(1);
        let assignments = partition(ctx.grid().len(), workers);
        let shared = Arc::new(Shared {
            ctx,
            start: PhasedGate::new(workers + 1),
            mid: PhasedGate::new(workers),
            finish: PhasedGate::new(workers + 1),
            tick_time: AtomicU64::new(0),
            migrations: Mutex::new(Vec::new()),
            faults: Mutex::new(Vec::new()),
        });

        let mut threads = Vec::with_capacity(workers);
        for (worker, cells) in assignments.clone().into_iter().enumerate() {
            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("vanet-worker-{worker}"))
                .spawn(move || worker_loop(worker, cells, &worker_shared));
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(err) => {
                    let mut pool = Self {
                        shared,
                        threads,
                        assignments,
                    };
                    pool.teardown();
                    return Err(SimError::Io(err));
                }
            }
        }
        debug!(workers, regions = shared.ctx.grid().len(), "worker pool started");
        Ok(Self {
            shared,
            threads,
            assignments,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.assignments.len()
    }

    /// Region cells owned by each worker.
    pub fn assignments(&self) -> &[Range<usize>] {
        &self.assignments
    }

    /// Runs both phases for time `now` and returns the collected migrations,
    /// ordered by vehicle id. On failure the pool is torn down.
    pub fn run_tick(&mut self, now: u64) -> SimResult<Vec<Migration>> {
        if self.threads.is_empty() {
            return Err(SimError::WorkerFault {
                worker: 0,
                message: "worker pool is shut down".to_string(),
            });
        }
        self.shared.tick_time.store(now, Ordering::Release);

        let result = self
            .shared
            .start
            .wait()
            .and_then(|_| self.shared.finish.wait());
        if let Err(gate) = result {
            let fault = self.shared.take_fault().unwrap_or(SimError::WorkerFault {
                worker: 0,
                message: format!("tick aborted: {gate}"),
            });
            self.teardown();
            return Err(fault);
        }

        let mut migrations = std::mem::take(
            &mut *self
                .shared
                .migrations
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        migrations.sort_by_key(|m| m.vehicle);
        Ok(migrations)
    }

    /// Cancels all gates and joins every worker.
    pub fn teardown(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.shared.cancel();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread ended with a panic");
            }
        }
        debug!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn worker_loop(worker: usize, cells: Range<usize>, shared: &Shared) {
    let ctx = shared.ctx.as_ref();
    loop {
        if shared.start.wait().is_err() {
            return;
        }
        let now = shared.tick_time.load(Ordering::Acquire);
        let settings = ctx.settings();
        let zones = ctx.mix_zones();
        let env = StepEnv::new(ctx, &settings, &zones, now);

        // Snapshots are taken once; phase 2 visits the same vehicles.
        let snapshots: Vec<_> = cells
            .clone()
            .filter_map(|index| ctx.grid().region(index).map(|r| (index, r.vehicle_snapshot())))
            .collect();

        let phase_one = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut moved = Vec::new();
            for (index, vehicles) in &snapshots {
                for handle in vehicles.iter() {
                    if ctx.should_fault(handle.id) {
                        panic!("injected fault while stepping vehicle {}", handle.id);
                    }
                    let mut vehicle = handle.lock();
                    if let Some(to) = systems::advance(&mut vehicle, &env) {
                        moved.push(Migration {
                            vehicle: handle.id,
                            from: *index,
                            to,
                        });
                    }
                }
            }
            moved
        }));
        let moved = match phase_one {
            Ok(moved) => moved,
            Err(payload) => {
                shared.record_fault(worker, payload);
                return;
            }
        };
        if !moved.is_empty() {
            shared
                .migrations
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .extend(moved);
        }

        if let Err(gate) = shared.mid.wait() {
            log_gate_exit(worker, gate);
            return;
        }

        let phase_two = panic::catch_unwind(AssertUnwindSafe(|| {
            for (_, vehicles) in &snapshots {
                for handle in vehicles.iter() {
                    communication::exchange(handle, &env);
                }
            }
        }));
        if let Err(payload) = phase_two {
            shared.record_fault(worker, payload);
            return;
        }

        if let Err(gate) = shared.finish.wait() {
            log_gate_exit(worker, gate);
            return;
        }
    }
}

fn log_gate_exit(worker: usize, gate: GateError) {
    match gate {
        GateError::Broken => debug!(worker, "gate broken; worker exiting"),
        GateError::Cancelled => debug!(worker, "gate cancelled; worker exiting"),
    }
}
