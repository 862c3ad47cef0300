//! Vehicles: position on the street graph, pending way points, route and
//! per-vehicle knowledge.
//!
//! A vehicle is shared between the region that owns it and the id registry of
//! the context through a [`VehicleHandle`]. During a tick only the worker owning
//! the vehicle's region mutates its motion state; other workers touch it solely
//! to deliver beacons and messages, always through the handle's lock.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::debug;

use crate::clock::TICK_MS;
use crate::error::{SimError, SimResult};
use crate::knowledge::{KnownVehiclesList, PenaltyRegistry};
use crate::map::{NodeId, Point, RoadMap, StreetDirection, StreetId};
use crate::messages::{Message, MessageKey, Outgoing};
use crate::routing::{
    LookupTablePool, Route, RouteLeg, Router, RoutingMode, TravelDirection, WayPoint,
};

pub type VehicleId = u32;

/// Per-vehicle counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct VehicleStats {
    pub distance: f64,
    pub beacons_sent: u64,
    pub beacons_received: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub reroutes: u64,
}

#[derive(Debug)]
pub struct Vehicle {
    pub id: VehicleId,
    /// Identifier carried in beacons; replaced when leaving a mix zone.
    pub pseudonym: i32,
    pub position: Point,
    /// Current speed in map units per second.
    pub speed: f64,
    pub max_speed: f64,
    pub street: StreetId,
    pub offset: f64,
    pub active: bool,
    /// Region the vehicle is registered in.
    pub region: usize,
    pub stats: VehicleStats,

    pub(crate) route: Option<Route>,
    pub(crate) leg: usize,
    /// Upcoming targets; the front one is the current route's target.
    pub(crate) waypoints: VecDeque<WayPoint>,
    pub(crate) wait_ms: u64,
    pub(crate) retry_route_at: Option<u64>,

    pub(crate) known: KnownVehiclesList,
    pub(crate) penalties: PenaltyRegistry,
    pub(crate) inbox: Vec<Message>,
    pub(crate) outbox: Vec<Outgoing>,
    /// Messages waiting to be forwarded on the next communication interval.
    pub(crate) carried: Vec<Message>,
    /// Keys of handled messages and the time they stop being relevant.
    pub(crate) seen: HashMap<MessageKey, u64>,
    pub(crate) next_seq: u32,

    pub(crate) standing_ms: u64,
    pub(crate) jam_reported: bool,
    pub(crate) beacon_countdown: u64,
    pub(crate) beacon_due: bool,
    pub(crate) communication_countdown: u64,
    pub(crate) mix_zone: Option<NodeId>,
    pub(crate) rng: StdRng,
}

impl Vehicle {
    /// Vehicle placed at `start`, heading for `waypoints` in order.
    pub fn new(id: VehicleId, start: WayPoint, waypoints: Vec<WayPoint>, max_speed: f64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed ^ u64::from(id).rotate_left(32));
        let pseudonym = rng.gen();
        Self {
            id,
            pseudonym,
            position: start.position,
            speed: 0.0,
            max_speed,
            street: start.street,
            offset: start.offset,
            active: true,
            region: 0,
            stats: VehicleStats::default(),
            route: None,
            leg: 0,
            waypoints: waypoints.into(),
            wait_ms: start.wait_ms,
            retry_route_at: None,
            known: KnownVehiclesList::new(),
            penalties: PenaltyRegistry::new(),
            inbox: Vec::new(),
            outbox: Vec::new(),
            carried: Vec::new(),
            seen: HashMap::new(),
            next_seq: 0,
            standing_ms: 0,
            jam_reported: false,
            // Spread the first beacons of a fleet over one interval.
            beacon_countdown: u64::from(id % 6) * TICK_MS,
            beacon_due: false,
            communication_countdown: 0,
            mix_zone: None,
            rng,
        }
    }

    pub fn route(&self) -> Option<&Route> {
        self.route.as_ref()
    }

    /// Legs not yet completed, the current one included.
    pub fn remaining_legs(&self) -> &[RouteLeg] {
        match &self.route {
            Some(route) => route.legs.get(self.leg..).unwrap_or(&[]),
            None => &[],
        }
    }

    pub fn current_leg(&self) -> Option<&RouteLeg> {
        self.route.as_ref().and_then(|route| route.legs.get(self.leg))
    }

    pub fn waypoints(&self) -> impl Iterator<Item = &WayPoint> {
        self.waypoints.iter()
    }

    pub fn known(&self) -> &KnownVehiclesList {
        &self.known
    }

    pub fn penalties(&self) -> &PenaltyRegistry {
        &self.penalties
    }

    pub fn mix_zone(&self) -> Option<NodeId> {
        self.mix_zone
    }

    pub fn is_waiting(&self) -> bool {
        self.wait_ms > 0
    }

    pub fn pending_messages(&self) -> usize {
        self.inbox.len() + self.carried.len()
    }

    /// Current position as a way point.
    pub fn here(&self, map: &RoadMap) -> SimResult<WayPoint> {
        WayPoint::at_offset(map, self.street, self.offset, 0)
    }

    /// Direction the vehicle currently drives along its street.
    pub fn heading(&self) -> TravelDirection {
        match self.current_leg() {
            Some(leg) => StreetDirection::of(leg.forward),
            None => StreetDirection::Both,
        }
    }

    /// Plans a fresh route to the front way point, leaving in any direction.
    ///
    /// Returns `Ok(false)` when there is nothing left to drive to.
    pub fn plan(&mut self, map: &RoadMap, pool: &LookupTablePool, mode: RoutingMode) -> SimResult<bool> {
        let Some(target) = self.waypoints.front().copied() else {
            return Ok(false);
        };
        let start = self.here(map)?;
        let route = Router::new(map, pool).route(
            mode,
            TravelDirection::Both,
            &start,
            &target,
            &self.penalties.route_penalties(),
        )?;
        self.install_route(route);
        Ok(true)
    }

    /// Recalculates the current route with the penalties now known, leaving
    /// along the current street in `direction`. On failure the previous route
    /// stays in place.
    pub fn reroute(
        &mut self,
        map: &RoadMap,
        pool: &LookupTablePool,
        mode: RoutingMode,
        direction: TravelDirection,
    ) -> SimResult<()> {
        let Some(target) = self.route.as_ref().map(|route| route.target) else {
            return Ok(());
        };
        let start = self.here(map)?;
        let route = Router::new(map, pool).route(
            mode,
            direction,
            &start,
            &target,
            &self.penalties.route_penalties(),
        )?;
        debug!(vehicle = self.id, cost = route.cost, "rerouted");
        self.stats.reroutes += 1;
        self.install_route(route);
        Ok(())
    }

    fn install_route(&mut self, route: Route) {
        self.penalties.refresh_route_flags(&route.legs);
        self.route = Some(route);
        self.leg = 0;
        self.retry_route_at = None;
    }

    pub(crate) fn clear_route(&mut self) {
        self.route = None;
        self.leg = 0;
    }

    pub(crate) fn next_message_key(&mut self) -> MessageKey {
        let key = MessageKey {
            origin: self.id,
            seq: self.next_seq,
        };
        self.next_seq = self.next_seq.wrapping_add(1);
        key
    }

    /// Fresh pseudonym, never equal to the current one.
    pub(crate) fn change_pseudonym(&mut self) -> i32 {
        let previous = self.pseudonym;
        while self.pseudonym == previous {
            self.pseudonym = self.rng.gen();
        }
        previous
    }

    /// Queues a message for handling during the next tick.
    pub fn deliver(&mut self, message: Message) {
        self.inbox.push(message);
    }

    /// Records a beacon heard from `sender`.
    #[allow(clippy::too_many_arguments)]
    pub fn receive_beacon(
        &mut self,
        sender: VehicleId,
        pseudonym: i32,
        position: Point,
        speed: f64,
        encrypted: bool,
        now: u64,
    ) {
        self.known
            .update(sender, pseudonym, position.x, position.y, speed, encrypted, now);
        self.stats.beacons_received += 1;
    }

    pub fn take_outbox(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    pub fn view(&self) -> VehicleView {
        VehicleView {
            id: self.id,
            pseudonym: self.pseudonym,
            position: self.position,
            speed: self.speed,
            street: self.street,
            offset: self.offset,
            active: self.active,
            region: self.region,
            mix_zone: self.mix_zone,
            known: self.known.len(),
        }
    }
}

/// Read-only copy of the observable vehicle state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VehicleView {
    pub id: VehicleId,
    pub pseudonym: i32,
    pub position: Point,
    pub speed: f64,
    pub street: StreetId,
    pub offset: f64,
    pub active: bool,
    pub region: usize,
    pub mix_zone: Option<NodeId>,
    pub known: usize,
}

/// Shared handle to a vehicle.
#[derive(Clone)]
pub struct VehicleHandle {
    pub id: VehicleId,
    vehicle: Arc<Mutex<Vehicle>>,
}

impl VehicleHandle {
    pub fn new(vehicle: Vehicle) -> Self {
        Self {
            id: vehicle.id,
            vehicle: Arc::new(Mutex::new(vehicle)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Vehicle> {
        self.vehicle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn view(&self) -> VehicleView {
        self.lock().view()
    }
}

impl fmt::Debug for VehicleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VehicleHandle").field("id", &self.id).finish()
    }
}

/// Validates the inputs of a new vehicle.
pub fn check_vehicle_input(waypoints: &[WayPoint], max_speed: f64, index: usize) -> SimResult<()> {
    if waypoints.len() < 2 {
        return Err(SimError::malformed(
            "vehicle",
            index,
            "a vehicle needs a start and at least one target",
        ));
    }
    if !(max_speed.is_finite() && max_speed > 0.0) {
        return Err(SimError::malformed("vehicle", index, "max speed must be positive"));
    }
    Ok(())
}
