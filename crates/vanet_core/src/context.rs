//! Simulation context: everything one simulation run owns.
//!
//! The context replaces process-wide singletons. The scheduler and every
//! worker share it through an `Arc`; interactive edits go through its methods,
//! which take the same locks the tick path uses.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

use tracing::{debug, info, warn};

use crate::clock::SimClock;
use crate::error::{SimError, SimResult};
use crate::events::{EventId, EventQueue};
use crate::map::{NodeId, Point, RoadMap, StreetDirection};
use crate::mix_zone::{self, MixZone, MixZoneCrossings};
use crate::routing::{LookupTablePool, Router, WayPoint};
use crate::runner::Migration;
use crate::scenario::{GridConfig, SimSettings};
use crate::sinks::{LogSink, TracingSink};
use crate::spatial::{RegionGrid, Transceiver, DEFAULT_REGION_SIZE};
use crate::telemetry::{Counter, Telemetry, TickSnapshot};
use crate::vehicle::{check_vehicle_input, Vehicle, VehicleHandle, VehicleId};

/// Id → handle lookup used to address messages.
#[derive(Debug, Default)]
pub struct VehicleRegistry {
    vehicles: RwLock<BTreeMap<VehicleId, VehicleHandle>>,
}

impl VehicleRegistry {
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<VehicleId, VehicleHandle>> {
        self.vehicles
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<VehicleId, VehicleHandle>> {
        self.vehicles
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, id: VehicleId) -> Option<VehicleHandle> {
        self.read().get(&id).cloned()
    }

    pub fn insert(&self, handle: VehicleHandle) {
        self.write().insert(handle.id, handle);
    }

    pub fn remove(&self, id: VehicleId) -> Option<VehicleHandle> {
        self.write().remove(&id)
    }

    /// All handles, ordered by id.
    pub fn handles(&self) -> Vec<VehicleHandle> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn clear(&self) {
        self.write().clear();
    }
}

pub struct SimContext {
    map: Arc<RoadMap>,
    grid: RegionGrid,
    events: EventQueue,
    lookup: LookupTablePool,
    settings: RwLock<SimSettings>,
    clock: SimClock,
    vehicles: VehicleRegistry,
    next_vehicle_id: AtomicU32,
    mix_zones: RwLock<Arc<[MixZone]>>,
    privacy_log: Arc<dyn LogSink>,
    attack_log: Arc<dyn LogSink>,
    telemetry: Telemetry,
    ready: AtomicBool,
    /// Held for the whole of a tick.
    tick_lock: Mutex<()>,
    #[cfg(feature = "test-helpers")]
    fault_on: RwLock<Option<VehicleId>>,
}

impl SimContext {
    pub fn new(map: RoadMap, settings: SimSettings) -> Self {
        Self::with_grid(map, GridConfig::default(), settings)
    }

    pub fn with_grid(map: RoadMap, grid: GridConfig, settings: SimSettings) -> Self {
        let grid = match (grid.columns, grid.rows) {
            (Some(columns), Some(rows)) => RegionGrid::new(&map, columns, rows),
            _ => RegionGrid::for_map(&map, grid.region_size.unwrap_or(DEFAULT_REGION_SIZE)),
        };
        let zones: Vec<MixZone> = map
            .nodes()
            .iter()
            .filter(|node| node.is_mix_zone())
            .filter_map(|node| {
                node.mix_zone_radius.map(|radius| MixZone {
                    node: node.id,
                    center: node.position,
                    radius,
                    transceiver: None,
                })
            })
            .collect();
        debug!(
            nodes = map.node_count(),
            streets = map.streets().len(),
            regions = grid.len(),
            mix_zones = zones.len(),
            "simulation context created"
        );
        Self {
            lookup: LookupTablePool::new(map.node_count()),
            map: Arc::new(map),
            grid,
            events: EventQueue::new(),
            settings: RwLock::new(settings),
            clock: SimClock::default(),
            vehicles: VehicleRegistry::default(),
            next_vehicle_id: AtomicU32::new(0),
            mix_zones: RwLock::new(Arc::from(zones)),
            privacy_log: Arc::new(TracingSink::privacy()),
            attack_log: Arc::new(TracingSink::attack()),
            telemetry: Telemetry::default(),
            ready: AtomicBool::new(true),
            tick_lock: Mutex::new(()),
            #[cfg(feature = "test-helpers")]
            fault_on: RwLock::new(None),
        }
    }

    /// Replaces the privacy and attack log sinks.
    pub fn with_logs(mut self, privacy: Arc<dyn LogSink>, attack: Arc<dyn LogSink>) -> Self {
        self.privacy_log = privacy;
        self.attack_log = attack;
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn map(&self) -> &RoadMap {
        &self.map
    }

    pub fn grid(&self) -> &RegionGrid {
        &self.grid
    }

    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    pub fn lookup_pool(&self) -> &LookupTablePool {
        &self.lookup
    }

    pub fn vehicles(&self) -> &VehicleRegistry {
        &self.vehicles
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn privacy_log(&self) -> &dyn LogSink {
        self.privacy_log.as_ref()
    }

    pub fn attack_log(&self) -> &dyn LogSink {
        self.attack_log.as_ref()
    }

    pub fn router(&self) -> Router<'_> {
        Router::new(&self.map, &self.lookup)
    }

    pub fn settings(&self) -> SimSettings {
        self.settings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Settings changes apply from the next tick on.
    pub fn update_settings(&self, update: impl FnOnce(&mut SimSettings)) {
        let mut settings = self
            .settings
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        update(&mut settings);
    }

    pub fn mix_zones(&self) -> Arc<[MixZone]> {
        Arc::clone(
            &self
                .mix_zones
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    /// A context that is not ready (still loading) is never ticked.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    // -----------------------------------------------------------------------
    // Vehicles
    // -----------------------------------------------------------------------

    /// Adds a vehicle starting at the first way point and driving to the others.
    ///
    /// A vehicle whose first route cannot be found is still added; it retries
    /// on every communication interval.
    pub fn add_vehicle(&self, waypoints: &[WayPoint], max_speed: f64) -> SimResult<VehicleId> {
        let id = self.next_vehicle_id.load(Ordering::Relaxed);
        check_vehicle_input(waypoints, max_speed, id as usize)?;
        let id = self.next_vehicle_id.fetch_add(1, Ordering::Relaxed);
        let settings = self.settings();

        let mut vehicle = Vehicle::new(
            id,
            waypoints[0],
            waypoints[1..].to_vec(),
            max_speed,
            settings.seed,
        );
        if let Err(err) = vehicle.plan(&self.map, &self.lookup, settings.routing_mode) {
            warn!(vehicle = id, error = %err, "no initial route; will retry");
            self.telemetry.incr(Counter::RouteFailures);
            vehicle.retry_route_at = Some(self.now() + settings.communication_interval_ms);
        }
        let position = vehicle.position;
        vehicle.region = self.grid.locate(&position);

        let handle = VehicleHandle::new(vehicle);
        self.grid.add_vehicle(handle.clone(), &position);
        self.vehicles.insert(handle);
        Ok(id)
    }

    /// Snaps `(x, y, wait_ms)` triples and adds the vehicle.
    pub fn add_vehicle_at(&self, points: &[(f64, f64, u64)], max_speed: f64) -> SimResult<VehicleId> {
        let waypoints = points
            .iter()
            .map(|&(x, y, wait_ms)| WayPoint::snap_in(&self.grid, &self.map, x, y, wait_ms))
            .collect::<SimResult<Vec<_>>>()?;
        self.add_vehicle(&waypoints, max_speed)
    }

    /// Removes a vehicle between ticks. Fails with `SchedulerBusy` while a
    /// tick is in flight.
    pub fn remove_vehicle(&self, id: VehicleId) -> SimResult<bool> {
        let _between_ticks = self.try_lock_between_ticks()?;
        let Some(handle) = self.vehicles.remove(id) else {
            return Ok(false);
        };
        let region = handle.lock().region;
        Ok(self.grid.remove_vehicle(region, id).is_some())
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<VehicleHandle> {
        self.vehicles.get(id)
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn active_vehicle_count(&self) -> usize {
        self.vehicles
            .handles()
            .iter()
            .filter(|handle| handle.lock().active)
            .count()
    }

    /// Moves vehicles that left their region during the last tick.
    pub fn apply_migrations(&self, migrations: &[Migration]) {
        for migration in migrations {
            if self.grid.migrate(migration.vehicle, migration.from, migration.to) {
                if let Some(handle) = self.vehicles.get(migration.vehicle) {
                    handle.lock().region = migration.to;
                }
            }
        }
    }

    /// Observable state of every vehicle at the current time.
    pub fn snapshot(&self) -> TickSnapshot {
        TickSnapshot {
            time: self.now(),
            vehicles: self.vehicles.handles().iter().map(VehicleHandle::view).collect(),
            telemetry: self.telemetry.summary(),
        }
    }

    // -----------------------------------------------------------------------
    // Mix zones and transceivers
    // -----------------------------------------------------------------------

    /// Turns `node` into a mix zone, replacing an existing zone on the same node.
    /// `radius` defaults to the configured mix-zone radius.
    pub fn add_mix_zone(
        &self,
        node: NodeId,
        radius: Option<f64>,
        transceiver: Option<Transceiver>,
    ) -> SimResult<()> {
        let center = self
            .map
            .node(node)
            .map(|n| n.position)
            .ok_or_else(|| SimError::malformed("mix zone", node as usize, "unknown node"))?;
        let radius = radius.unwrap_or_else(|| self.settings().mix_zone_radius);
        if !(radius.is_finite() && radius > 0.0) {
            return Err(SimError::malformed("mix zone", node as usize, "radius must be positive"));
        }
        let transceiver_id = transceiver.as_ref().map(|t| t.id);
        if let Some(mut transceiver) = transceiver {
            transceiver.mix_zone = Some(node);
            self.add_transceiver(transceiver);
        }

        let mut zones = self
            .mix_zones
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut updated: Vec<MixZone> = zones.iter().filter(|z| z.node != node).copied().collect();
        updated.push(MixZone {
            node,
            center,
            radius,
            transceiver: transceiver_id,
        });
        updated.sort_by_key(|z| z.node);
        *zones = Arc::from(updated);
        drop(zones);

        for region in self.grid.regions() {
            region.remove_mix_zone(node);
        }
        for index in self.grid.regions_in_circle(&center, radius) {
            if let Some(region) = self.grid.region(index) {
                region.add_mix_zone(node);
            }
        }
        Ok(())
    }

    pub fn remove_mix_zone(&self, node: NodeId) -> bool {
        let mut zones = self
            .mix_zones
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(removed) = zones.iter().find(|z| z.node == node).copied() else {
            return false;
        };
        let remaining: Vec<MixZone> = zones.iter().filter(|z| z.node != node).copied().collect();
        *zones = Arc::from(remaining);
        drop(zones);

        for region in self.grid.regions() {
            region.remove_mix_zone(node);
        }
        if let Some(id) = removed.transceiver {
            self.remove_transceiver(id);
        }
        true
    }

    pub fn add_transceiver(&self, transceiver: Transceiver) {
        let index = self.grid.locate(&transceiver.position);
        if let Some(region) = self.grid.region(index) {
            region.add_transceiver(transceiver);
        }
    }

    pub fn remove_transceiver(&self, id: u32) -> bool {
        self.grid
            .regions()
            .iter()
            .any(|region| region.remove_transceiver(id))
    }

    pub fn transceivers(&self) -> Vec<Transceiver> {
        self.grid
            .regions()
            .iter()
            .flat_map(|region| region.transceivers())
            .collect()
    }

    /// Computes where every zone crosses the streets and writes the
    /// `Mix-Zone(x)` / `Mix-Zone(y)` lines to the privacy log.
    pub fn precompute_mix_zones(&self) -> Vec<MixZoneCrossings> {
        let zones = self.mix_zones();
        let crossings = mix_zone::precompute(&self.map, &self.grid, &zones, self.privacy_log());
        info!(zones = crossings.len(), "mix zone geometry computed");
        crossings
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub fn add_start_blocking(
        &self,
        time: u64,
        x: f64,
        y: f64,
        direction: StreetDirection,
        lanes: u8,
    ) -> SimResult<EventId> {
        self.events
            .add_start_blocking(&self.map, time, x, y, direction, lanes)
    }

    pub fn add_stop_blocking(&self, time: u64, x: f64, y: f64) -> SimResult<EventId> {
        self.events.add_stop_blocking(time, x, y)
    }

    pub fn remove_event(&self, id: EventId) -> SimResult<()> {
        self.events.remove_event(&self.map, id)
    }

    /// Fires the events due by `now`.
    pub fn process_due_events(&self, now: u64) -> Vec<EventId> {
        let fired = self.events.process_due(&self.map, now);
        self.telemetry.add(Counter::EventsFired, fired.len() as u64);
        fired
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Drops every vehicle and event and rewinds the clock. Map, zones and
    /// transceivers stay. Fails with `SchedulerBusy` while a tick is in flight.
    pub fn reset(&self) -> SimResult<()> {
        let _between_ticks = self.try_lock_between_ticks()?;
        for region in self.grid.regions() {
            region.clear_vehicles();
        }
        self.vehicles.clear();
        self.next_vehicle_id.store(0, Ordering::Relaxed);
        self.events.clear(&self.map);
        self.clock.reset();
        self.lookup.clear(self.map.node_count());
        self.telemetry.reset();
        info!("simulation reset");
        Ok(())
    }

    /// Excludes other ticks and structural edits until the guard drops.
    pub(crate) fn lock_tick(&self) -> MutexGuard<'_, ()> {
        self.tick_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_lock_between_ticks(&self) -> SimResult<MutexGuard<'_, ()>> {
        match self.tick_lock.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Err(SimError::SchedulerBusy),
        }
    }

    /// Position at the centre of the map.
    pub fn center(&self) -> Point {
        let (min, max) = self.map.bounds();
        Point::new((min.x + max.x) / 2.0, (min.y + max.y) / 2.0)
    }

    /// Makes the worker stepping `vehicle` panic on its next step.
    #[cfg(feature = "test-helpers")]
    pub fn inject_fault(&self, vehicle: Option<VehicleId>) {
        *self
            .fault_on
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = vehicle;
    }

    #[cfg(feature = "test-helpers")]
    pub(crate) fn should_fault(&self, vehicle: VehicleId) -> bool {
        *self
            .fault_on
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            == Some(vehicle)
    }

    #[cfg(not(feature = "test-helpers"))]
    pub(crate) fn should_fault(&self, _vehicle: VehicleId) -> bool {
        false
    }
}
