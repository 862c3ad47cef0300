mod support;

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use vanet_core::scenario::{generate_random_vehicles, SchedulerConfig};
use vanet_core::telemetry::{Counter, TickSnapshot};
use vanet_core::test_helpers::grid_context;
use vanet_core::{SchedulerState, SimError, TickScheduler};

use support::sim::{eventually, route_of, scheduler, wait_idle, TestSimBuilder};

fn three_vehicle_sim() -> Arc<vanet_core::SimContext> {
    TestSimBuilder::new()
        .with_vehicle((0.0, 0.0), (9000.0, 9000.0), 1000.0)
        .with_vehicle((9000.0, 0.0), (0.0, 9000.0), 1000.0)
        .with_vehicle((4500.0, 0.0), (4500.0, 9000.0), 1000.0)
        .build()
}

#[test]
fn jump_to_runs_whole_ticks_and_stays_on_routes() {
    let ctx = three_vehicle_sim();
    let routes: Vec<_> = (0..3).map(|id| route_of(&ctx, id)).collect();
    let sched = scheduler(&ctx, 4);

    sched.jump_to(1000);
    wait_idle(&sched);

    assert_eq!(sched.now(), 1000);
    assert_eq!(sched.state(), SchedulerState::Idle);
    assert_eq!(ctx.telemetry().get(Counter::Ticks), 25);
    for (id, route) in routes.iter().enumerate() {
        let handle = ctx.vehicle(id as u32).expect("vehicle");
        let vehicle = handle.lock();
        assert!(
            route.contains_point(ctx.map(), &vehicle.position, 1e-6),
            "vehicle {id} left its route at {:?}",
            vehicle.position
        );
        assert!((vehicle.stats.distance - 1000.0).abs() < 1e-6);
    }
}

#[test]
fn jump_to_a_past_time_does_nothing() {
    let ctx = three_vehicle_sim();
    let sched = scheduler(&ctx, 2);
    sched.jump_to(200);
    wait_idle(&sched);
    sched.jump_to(120);
    wait_idle(&sched);
    assert_eq!(sched.now(), 200);
    assert_eq!(ctx.telemetry().get(Counter::Ticks), 5);
}

#[test]
fn results_do_not_depend_on_worker_count() {
    let run = |workers: usize| {
        let ctx = Arc::new(grid_context(10, 10, 1000.0, 4, 4));
        generate_random_vehicles(&ctx, 40, 11).expect("vehicles");
        let sched = scheduler(&ctx, workers);
        sched.jump_to(2000);
        wait_idle(&sched);
        let snapshot = ctx.snapshot();
        let views: Vec<_> = snapshot
            .vehicles
            .iter()
            .map(|v| (v.id, v.position, v.speed, v.street, v.offset, v.active, v.known))
            .collect();
        (views, snapshot.telemetry)
    };

    let single = run(1);
    assert_eq!(single.1.ticks, 50);
    assert!(single.1.beacons_sent > 0);
    assert_eq!(run(2), single);
    assert_eq!(run(4), single);
}

#[test]
fn step_once_advances_one_tick() {
    let ctx = three_vehicle_sim();
    let sched = scheduler(&ctx, 2);

    sched.step_once();
    wait_idle(&sched);
    assert_eq!(sched.now(), 40);

    sched.step_once();
    wait_idle(&sched);
    assert_eq!(sched.now(), 80);
    assert_eq!(sched.state(), SchedulerState::Idle);
}

#[test]
fn start_and_stop_run_continuously() {
    let ctx = three_vehicle_sim();
    let sched = scheduler(&ctx, 2);

    sched.start();
    assert!(eventually(|| sched.now() >= 200));
    sched.stop();
    wait_idle(&sched);

    let stopped_at = sched.now();
    assert_eq!(stopped_at % 40, 0);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(sched.now(), stopped_at);
    assert!(sched.timings().get("tick").is_some());
}

#[test]
fn worker_fault_stops_the_run_without_advancing_time() {
    let ctx = three_vehicle_sim();
    let sched = scheduler(&ctx, 4);

    ctx.inject_fault(Some(1));
    sched.start();
    assert!(eventually(|| sched.state() == SchedulerState::Idle));
    wait_idle(&sched);

    assert!(matches!(
        sched.take_fault(),
        Some(SimError::WorkerFault { .. })
    ));
    assert_eq!(sched.now(), 0);

    // A fresh pool is built for the next command.
    ctx.inject_fault(None);
    sched.step_once();
    wait_idle(&sched);
    assert_eq!(sched.now(), 40);
    assert!(sched.take_fault().is_none());
    assert_eq!(sched.pools_spawned(), 2);
}

#[test]
fn consecutive_steps_reuse_one_worker_pool() {
    let ctx = three_vehicle_sim();
    let sched = scheduler(&ctx, 4);

    for expected in [40, 80] {
        sched.step_once();
        wait_idle(&sched);
        assert_eq!(sched.now(), expected);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(sched.pools_spawned(), 1);
    }
    sched.start();
    assert!(eventually(|| sched.now() >= 200));
    sched.stop();
    wait_idle(&sched);
    assert_eq!(sched.pools_spawned(), 1);
}

#[test]
fn consumer_sees_every_running_tick_and_one_frame_per_jump() {
    let ctx = three_vehicle_sim();
    let seen = Arc::new(Mutex::new(Vec::<(u64, u64)>::new()));
    let sink = Arc::clone(&seen);
    let consumer = move |snapshot: &TickSnapshot| {
        sink.lock()
            .expect("lock")
            .push((snapshot.time, snapshot.telemetry.ticks));
    };
    let sched = TickScheduler::with_consumer(
        Arc::clone(&ctx),
        SchedulerConfig::default()
            .with_workers(2)
            .with_tick_interval_ms(1),
        Box::new(consumer),
    )
    .expect("scheduler");

    sched.start();
    assert!(eventually(|| sched.now() >= 400));
    sched.stop();
    wait_idle(&sched);

    let frames = seen.lock().expect("lock").clone();
    assert!(!frames.is_empty());
    for (index, (time, ticks)) in frames.iter().enumerate() {
        assert_eq!(*time, 40 * (index as u64 + 1));
        assert_eq!(*ticks, time / 40);
    }

    seen.lock().expect("lock").clear();
    let target = sched.now() + 400;
    sched.jump_to(target);
    wait_idle(&sched);
    assert_eq!(*seen.lock().expect("lock"), vec![(target, target / 40)]);
}

#[test]
fn context_can_only_be_replaced_while_idle() {
    let ctx = three_vehicle_sim();
    let mut sched = scheduler(&ctx, 2);
    sched.jump_to(400);
    wait_idle(&sched);

    sched.start();
    let fresh = TestSimBuilder::new()
        .with_vehicle((0.0, 0.0), (9000.0, 0.0), 1000.0)
        .build();
    assert!(matches!(
        sched.replace_context(Arc::clone(&fresh)),
        Err(SimError::SchedulerBusy)
    ));
    sched.stop();
    wait_idle(&sched);

    sched.replace_context(Arc::clone(&fresh)).expect("replace");
    sched.step_once();
    wait_idle(&sched);
    assert_eq!(fresh.now(), 40);
    assert_eq!(sched.context().vehicle_count(), 1);
    sched.shutdown();
}
