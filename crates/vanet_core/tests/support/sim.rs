#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use vanet_core::context::SimContext;
use vanet_core::routing::Route;
use vanet_core::runner;
use vanet_core::scenario::{SchedulerConfig, SimSettings};
use vanet_core::sinks::{LogSink, MemorySink, NullSink};
use vanet_core::test_helpers::grid_context_with;
use vanet_core::vehicle::{VehicleId, VehicleView};
use vanet_core::workers::WorkerPool;
use vanet_core::TickScheduler;

/// Grid simulation fixture: a `columns × rows` street grid with vehicles
/// driving between snapped points.
pub struct TestSimBuilder {
    columns: usize,
    rows: usize,
    spacing: f64,
    regions: (usize, usize),
    settings: SimSettings,
    vehicles: Vec<(Vec<(f64, f64, u64)>, f64)>,
    privacy: Option<Arc<MemorySink>>,
    attack: Option<Arc<MemorySink>>,
}

impl Default for TestSimBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestSimBuilder {
    /// 10 × 10 junctions, 1000 units apart, split into 4 × 4 regions.
    pub fn new() -> Self {
        Self {
            columns: 10,
            rows: 10,
            spacing: 1000.0,
            regions: (4, 4),
            settings: SimSettings::default(),
            vehicles: Vec::new(),
            privacy: None,
            attack: None,
        }
    }

    pub fn with_grid(mut self, columns: usize, rows: usize, spacing: f64) -> Self {
        self.columns = columns;
        self.rows = rows;
        self.spacing = spacing;
        self
    }

    pub fn with_regions(mut self, columns: usize, rows: usize) -> Self {
        self.regions = (columns, rows);
        self
    }

    pub fn with_settings(mut self, settings: SimSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_vehicle(mut self, from: (f64, f64), to: (f64, f64), max_speed: f64) -> Self {
        self.vehicles
            .push((vec![(from.0, from.1, 0), (to.0, to.1, 0)], max_speed));
        self
    }

    /// Vehicle waiting `wait_ms` at its start before driving.
    pub fn with_waiting_vehicle(
        mut self,
        from: (f64, f64),
        wait_ms: u64,
        to: (f64, f64),
        max_speed: f64,
    ) -> Self {
        self.vehicles
            .push((vec![(from.0, from.1, wait_ms), (to.0, to.1, 0)], max_speed));
        self
    }

    pub fn with_privacy_log(mut self, sink: Arc<MemorySink>) -> Self {
        self.privacy = Some(sink);
        self
    }

    pub fn with_attack_log(mut self, sink: Arc<MemorySink>) -> Self {
        self.attack = Some(sink);
        self
    }

    pub fn build(self) -> Arc<SimContext> {
        let privacy: Arc<dyn LogSink> = match self.privacy {
            Some(sink) => sink,
            None => Arc::new(NullSink),
        };
        let attack: Arc<dyn LogSink> = match self.attack {
            Some(sink) => sink,
            None => Arc::new(NullSink),
        };
        let ctx = grid_context_with(
            self.columns,
            self.rows,
            self.spacing,
            self.regions.0,
            self.regions.1,
            self.settings,
        )
        .with_logs(privacy, attack);
        for (points, max_speed) in &self.vehicles {
            ctx.add_vehicle_at(points, *max_speed).expect("vehicle");
        }
        Arc::new(ctx)
    }
}

/// Scheduler with fast pacing for tests.
pub fn scheduler(ctx: &Arc<SimContext>, workers: usize) -> TickScheduler {
    let config = SchedulerConfig::default()
        .with_workers(workers)
        .with_tick_interval_ms(1);
    TickScheduler::new(Arc::clone(ctx), config).expect("scheduler")
}

pub fn wait_idle(scheduler: &TickScheduler) {
    assert!(
        scheduler.wait_for_idle(Duration::from_secs(20)),
        "scheduler did not become idle"
    );
}

/// Polls `condition` for up to ten seconds.
pub fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

/// Drives ticks directly on a worker pool, without the scheduler thread.
pub struct TickRunner {
    pub ctx: Arc<SimContext>,
    pool: WorkerPool,
}

impl TickRunner {
    pub fn new(ctx: &Arc<SimContext>, workers: usize) -> Self {
        Self {
            ctx: Arc::clone(ctx),
            pool: WorkerPool::spawn(Arc::clone(ctx), workers).expect("pool"),
        }
    }

    pub fn run_until(&mut self, time: u64) {
        runner::run_until(&mut self.pool, &self.ctx, time).expect("run");
    }

    pub fn view(&self, id: VehicleId) -> VehicleView {
        self.ctx.vehicle(id).expect("vehicle").view()
    }
}

pub fn route_of(ctx: &SimContext, id: VehicleId) -> Route {
    ctx.vehicle(id)
        .expect("vehicle")
        .lock()
        .route()
        .cloned()
        .expect("route")
}
