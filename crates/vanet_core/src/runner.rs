//! Tick runner: fires due events, runs both phases on the pool, applies
//! region migrations and publishes the new time.
//!
//! The scheduler drives ticks through [`run_tick`]; tests and the headless
//! binary may call it directly.

use tracing::trace;

use crate::context::SimContext;
use crate::error::SimResult;
use crate::profiling::TickTimings;
use crate::telemetry::{Counter, TickSnapshot};
use crate::time_phase;
use crate::vehicle::VehicleId;
use crate::workers::WorkerPool;

/// A vehicle that left its region during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub vehicle: VehicleId,
    pub from: usize,
    pub to: usize,
}

/// Advances the simulation by one tick and returns the published time.
///
/// On error the tick is abandoned and the time stays where it was.
pub fn run_tick(
    pool: &mut WorkerPool,
    ctx: &SimContext,
    mut timings: Option<&mut TickTimings>,
) -> SimResult<u64> {
    let _tick = ctx.lock_tick();
    let next = ctx.clock().next_tick();
    time_phase!("events", timings.as_deref_mut(), {
        ctx.process_due_events(next);
    });
    let migrations = time_phase!("phases", timings.as_deref_mut(), { pool.run_tick(next)? });
    time_phase!("migrations", timings.as_deref_mut(), {
        ctx.apply_migrations(&migrations);
    });
    ctx.clock().publish(next);
    ctx.telemetry().incr(Counter::Ticks);
    trace!(time = next, migrations = migrations.len(), "tick published");
    Ok(next)
}

/// Runs ticks until the published time reaches `target`. Returns the ticks run.
pub fn run_until(pool: &mut WorkerPool, ctx: &SimContext, target: u64) -> SimResult<u64> {
    run_until_with_hook(pool, ctx, target, |_| {})
}

/// Runs ticks until `target` and calls `hook` with a snapshot after each one.
pub fn run_until_with_hook<F>(
    pool: &mut WorkerPool,
    ctx: &SimContext,
    target: u64,
    mut hook: F,
) -> SimResult<u64>
where
    F: FnMut(&TickSnapshot),
{
    let mut ticks = 0;
    while ctx.now() < target {
        run_tick(pool, ctx, None)?;
        ticks += 1;
        hook(&ctx.snapshot());
    }
    Ok(ticks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::map::StreetDirection;
    use crate::test_helpers::grid_context;

    #[test]
    fn run_until_publishes_whole_ticks() {
        let ctx = Arc::new(grid_context(4, 4, 1000.0, 2, 2));
        ctx.add_vehicle_at(&[(0.0, 0.0, 0), (3000.0, 3000.0, 0)], 1000.0)
            .expect("vehicle");
        let mut pool = WorkerPool::spawn(Arc::clone(&ctx), 2).expect("pool");
        let mut seen = Vec::new();
        let ticks = run_until_with_hook(&mut pool, &ctx, 100, |snapshot| seen.push(snapshot.time))
            .expect("run");
        assert_eq!(ticks, 3);
        assert_eq!(seen, vec![40, 80, 120]);
        assert_eq!(ctx.now(), 120);
        assert_eq!(ctx.telemetry().get(Counter::Ticks), 3);
        // Already there.
        assert_eq!(run_until(&mut pool, &ctx, 120).expect("run"), 0);
    }

    #[test]
    fn events_fire_before_the_tick_that_reaches_them() {
        let ctx = Arc::new(grid_context(3, 3, 1000.0, 1, 1));
        ctx.add_start_blocking(40, 500.0, 0.0, StreetDirection::Both, 1)
            .expect("event");
        let mut pool = WorkerPool::spawn(Arc::clone(&ctx), 1).expect("pool");
        let mut timings = TickTimings::default();
        run_tick(&mut pool, &ctx, Some(&mut timings)).expect("tick");
        assert_eq!(ctx.telemetry().get(Counter::EventsFired), 1);
        assert!(timings.get("phases").is_some());
        assert_eq!(ctx.events().active_blockings().len(), 1);
    }
}
