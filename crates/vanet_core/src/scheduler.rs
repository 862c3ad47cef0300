//! Tick scheduler: a coordinator thread that paces ticks and owns the
//! worker pool.
//!
//! The control surface (`start`, `stop`, `step_once`, `jump_to`, ...) may be
//! called from any thread. Commands only change the shared control state and
//! wake the coordinator; the tick in flight always completes first.
//!
//! The worker pool outlives idle periods. It is rebuilt when the context is
//! replaced or a tick faulted. Stopping while the context is not ready
//! releases it, as does shutdown.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info};

use crate::context::SimContext;
use crate::consumer::{RenderHandoff, TickConsumer};
use crate::error::{SimError, SimResult};
use crate::profiling::TickTimings;
use crate::runner::run_tick;
use crate::scenario::SchedulerConfig;
use crate::workers::WorkerPool;

/// How often a scheduler waiting for its context to become ready looks again.
const READY_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    Idle,
    /// Ticking continuously, paced by the tick interval.
    Running,
    /// Running a single tick.
    SteppingOnce,
    /// Ticking without pacing or rendering until the jump target.
    FastForwarding,
}

struct Control {
    state: SchedulerState,
    ctx: Arc<SimContext>,
    /// Bumped when the context is replaced; the pool is rebuilt.
    epoch: u64,
    jump_target: Option<u64>,
    tick_interval: Duration,
    shutdown: bool,
    /// A tick is in flight.
    ticking: bool,
    fault: Option<SimError>,
    timings: TickTimings,
    pools_spawned: u64,
}

struct Inner {
    control: Mutex<Control>,
    changed: Condvar,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct TickScheduler {
    inner: Arc<Inner>,
    coordinator: Option<JoinHandle<()>>,
    workers: usize,
}

impl TickScheduler {
    pub fn new(ctx: Arc<SimContext>, config: SchedulerConfig) -> SimResult<Self> {
        Self::build(ctx, config, None)
    }

    /// Scheduler that hands a snapshot to `consumer` after every rendered tick.
    pub fn with_consumer(
        ctx: Arc<SimContext>,
        config: SchedulerConfig,
        consumer: Box<dyn TickConsumer>,
    ) -> SimResult<Self> {
        let handoff =
            RenderHandoff::spawn(consumer, Duration::from_millis(config.render_timeout_ms))?;
        Self::build(ctx, config, Some(handoff))
    }

    fn build(
        ctx: Arc<SimContext>,
        config: SchedulerConfig,
        handoff: Option<RenderHandoff>,
    ) -> SimResult<Self> {
        let workers = config.worker_count();
        let inner = Arc::new(Inner {
            control: Mutex::new(Control {
                state: SchedulerState::Idle,
                ctx,
                epoch: 0,
                jump_target: None,
                tick_interval: Duration::from_millis(config.tick_interval_ms),
                shutdown: false,
                ticking: false,
                fault: None,
                timings: TickTimings::default(),
                pools_spawned: 0,
            }),
            changed: Condvar::new(),
        });
        let coordinator_inner = Arc::clone(&inner);
        let coordinator = thread::Builder::new()
            .name("vanet-coordinator".to_string())
            .spawn(move || coordinator_loop(&coordinator_inner, workers, handoff))
            .map_err(SimError::Io)?;
        info!(workers, "tick scheduler started");
        Ok(Self {
            inner,
            coordinator: Some(coordinator),
            workers,
        })
    }

    fn command(&self, update: impl FnOnce(&mut Control)) {
        let mut control = self.inner.lock();
        update(&mut control);
        self.inner.changed.notify_all();
    }

    /// Ticks continuously. No-op while already running.
    pub fn start(&self) {
        self.command(|c| {
            if c.state != SchedulerState::Running {
                c.jump_target = None;
                c.state = SchedulerState::Running;
            }
        });
    }

    /// Returns to idle once the tick in flight has finished.
    pub fn stop(&self) {
        self.command(|c| {
            c.jump_target = None;
            c.state = SchedulerState::Idle;
        });
    }

    /// Runs exactly one tick, then goes idle.
    pub fn step_once(&self) {
        self.command(|c| {
            if c.state == SchedulerState::Idle {
                c.state = SchedulerState::SteppingOnce;
            }
        });
    }

    /// Runs unpaced until the published time is at least `target`. Nothing
    /// happens when that time was already reached.
    pub fn jump_to(&self, target: u64) {
        self.command(|c| {
            if c.ctx.now() >= target {
                return;
            }
            c.jump_target = Some(target);
            c.state = SchedulerState::FastForwarding;
        });
    }

    /// Real-time pacing of running mode. Simulated time per tick is fixed.
    pub fn set_tick_interval_ms(&self, ms: u64) {
        self.command(|c| c.tick_interval = Duration::from_millis(ms));
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.lock().state
    }

    pub fn now(&self) -> u64 {
        self.inner.lock().ctx.now()
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    pub fn context(&self) -> Arc<SimContext> {
        Arc::clone(&self.inner.lock().ctx)
    }

    /// Blocks until the scheduler is idle and no tick is in flight. Returns
    /// `false` on timeout.
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        let control = self.inner.lock();
        let (control, result) = self
            .inner
            .changed
            .wait_timeout_while(control, timeout, |c| {
                (c.state != SchedulerState::Idle || c.ticking) && !c.shutdown
            })
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        drop(control);
        !result.timed_out()
    }

    /// The worker fault that stopped the last run, if any.
    pub fn take_fault(&self) -> Option<SimError> {
        self.inner.lock().fault.take()
    }

    pub fn timings(&self) -> TickTimings {
        self.inner.lock().timings.clone()
    }

    /// How many worker pools were started so far.
    pub fn pools_spawned(&self) -> u64 {
        self.inner.lock().pools_spawned
    }

    /// Swaps in a new simulation, e.g. after loading another scenario.
    pub fn replace_context(&self, ctx: Arc<SimContext>) -> SimResult<()> {
        let mut control = self.inner.lock();
        if control.state != SchedulerState::Idle {
            return Err(SimError::SchedulerBusy);
        }
        control.ctx = ctx;
        control.epoch += 1;
        control.fault = None;
        control.timings = TickTimings::default();
        self.inner.changed.notify_all();
        Ok(())
    }

    /// Stops the coordinator and joins it.
    pub fn shutdown(&mut self) {
        self.command(|c| {
            c.shutdown = true;
            c.state = SchedulerState::Idle;
        });
        if let Some(coordinator) = self.coordinator.take() {
            if coordinator.join().is_err() {
                error!("coordinator thread panicked");
            }
        }
    }
}

impl Drop for TickScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// What the coordinator does next.
enum Step {
    Tick {
        ctx: Arc<SimContext>,
        epoch: u64,
        state: SchedulerState,
        target: Option<u64>,
        interval: Duration,
    },
    /// The pool belongs to a replaced context, or was stopped while the
    /// context is not ready.
    Release,
    Exit,
}

fn next_step(inner: &Inner, pool_epoch: Option<u64>) -> Step {
    let mut control = inner.lock();
    loop {
        if control.shutdown {
            return Step::Exit;
        }
        if pool_epoch.is_some_and(|epoch| epoch != control.epoch) {
            return Step::Release;
        }
        if control.state == SchedulerState::Idle {
            // Stopped while the map is still loading.
            if pool_epoch.is_some() && !control.ctx.is_ready() {
                return Step::Release;
            }
            control = inner
                .changed
                .wait(control)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            continue;
        }
        // An existing pool stays parked on its start gate meanwhile.
        if !control.ctx.is_ready() {
            control = inner
                .changed
                .wait_timeout(control, READY_POLL)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
            continue;
        }
        control.ticking = true;
        return Step::Tick {
            ctx: Arc::clone(&control.ctx),
            epoch: control.epoch,
            state: control.state,
            target: control.jump_target,
            interval: control.tick_interval,
        };
    }
}

/// Clears the in-flight flag however the tick ends.
struct TickInFlight<'a>(&'a Inner);

impl Drop for TickInFlight<'_> {
    fn drop(&mut self) {
        self.0.lock().ticking = false;
        self.0.changed.notify_all();
    }
}

fn coordinator_loop(inner: &Inner, workers: usize, handoff: Option<RenderHandoff>) {
    let mut pool: Option<(u64, WorkerPool)> = None;
    let mut timings = TickTimings::default();
    loop {
        let (ctx, epoch, state, target, interval) = match next_step(inner, pool.as_ref().map(|(epoch, _)| *epoch)) {
            Step::Exit => break,
            Step::Release => {
                debug!("releasing worker pool");
                pool = None;
                continue;
            }
            Step::Tick {
                ctx,
                epoch,
                state,
                target,
                interval,
            } => (ctx, epoch, state, target, interval),
        };
        let _in_flight = TickInFlight(inner);

        if state == SchedulerState::FastForwarding && target.map_or(true, |t| ctx.now() >= t) {
            finish_jump(inner, &ctx, handoff.as_ref());
            continue;
        }

        if pool.as_ref().map(|(e, _)| *e) != Some(epoch) {
            pool = None;
            if epoch_changed(inner, epoch) {
                continue;
            }
            timings = TickTimings::default();
            match WorkerPool::spawn(Arc::clone(&ctx), workers) {
                Ok(spawned) => {
                    inner.lock().pools_spawned += 1;
                    pool = Some((epoch, spawned));
                }
                Err(err) => {
                    fail(inner, err);
                    continue;
                }
            }
        }
        let Some((_, worker_pool)) = pool.as_mut() else {
            continue;
        };

        let started = Instant::now();
        let result = run_tick(worker_pool, &ctx, Some(&mut timings));
        let elapsed = started.elapsed();
        timings.record("tick", elapsed);

        let now = match result {
            Ok(now) => now,
            Err(err) => {
                pool = None;
                fail(inner, err);
                continue;
            }
        };

        match state {
            SchedulerState::FastForwarding => {
                inner.lock().timings = timings.clone();
                if target.map_or(true, |t| now >= t) {
                    finish_jump(inner, &ctx, handoff.as_ref());
                }
            }
            SchedulerState::SteppingOnce => {
                {
                    let mut control = inner.lock();
                    control.timings = timings.clone();
                    if control.state == SchedulerState::SteppingOnce {
                        control.state = SchedulerState::Idle;
                    }
                }
                render(&ctx, handoff.as_ref());
                inner.changed.notify_all();
            }
            SchedulerState::Running | SchedulerState::Idle => {
                inner.lock().timings = timings.clone();
                render(&ctx, handoff.as_ref());
                pace(inner, started, interval, &mut timings);
            }
        }
    }
    drop(pool);
    debug!("coordinator stopped");
}

fn epoch_changed(inner: &Inner, epoch: u64) -> bool {
    inner.lock().epoch != epoch
}

fn render(ctx: &SimContext, handoff: Option<&RenderHandoff>) {
    if let Some(handoff) = handoff {
        handoff.deliver(ctx.snapshot());
    }
}

/// Ends a jump with one render pass.
fn finish_jump(inner: &Inner, ctx: &SimContext, handoff: Option<&RenderHandoff>) {
    {
        let mut control = inner.lock();
        if control.state == SchedulerState::FastForwarding {
            control.state = SchedulerState::Idle;
            control.jump_target = None;
        }
    }
    render(ctx, handoff);
    debug!(time = ctx.now(), "jump finished");
    inner.changed.notify_all();
}

fn fail(inner: &Inner, err: SimError) {
    error!(error = %err, "tick failed; scheduler idle");
    let mut control = inner.lock();
    control.fault = Some(err);
    control.state = SchedulerState::Idle;
    control.jump_target = None;
    inner.changed.notify_all();
}

/// Sleeps out the rest of the tick interval, waking early on commands.
fn pace(inner: &Inner, started: Instant, interval: Duration, timings: &mut TickTimings) {
    let elapsed = started.elapsed();
    if elapsed >= interval {
        if !interval.is_zero() {
            timings.record_overrun();
        }
        return;
    }
    let control = inner.lock();
    let _ = inner
        .changed
        .wait_timeout_while(control, interval - elapsed, |c| {
            c.state == SchedulerState::Running && !c.shutdown
        })
        .unwrap_or_else(|poisoned| poisoned.into_inner());
}
