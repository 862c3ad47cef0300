//! Per-vehicle work done during a tick.
//!
//! A tick runs in two phases separated by the mid gate:
//!
//! 1. [`advance`]: the worker owning a vehicle's region updates that vehicle
//!    alone: knowledge upkeep, inbox handling, movement, jam detection,
//!    mix-zone state and timers.
//! 2. [`communication::exchange`]: beacons and queued messages are delivered
//!    to receivers anywhere on the map. Receivers only get their known list
//!    updated and their inbox filled; the inbox is read in the next tick's
//!    first phase.

pub mod communication;
pub mod maintenance;
pub mod messaging;
pub mod movement;
pub mod privacy;

use tracing::debug;

use crate::clock::TICK_MS;
use crate::context::{SimContext, VehicleRegistry};
use crate::map::RoadMap;
use crate::mix_zone::MixZone;
use crate::routing::{LookupTablePool, TravelDirection};
use crate::scenario::SimSettings;
use crate::sinks::LogSink;
use crate::spatial::RegionGrid;
use crate::telemetry::{Counter, Telemetry};
use crate::vehicle::Vehicle;

/// Everything a vehicle step may read.
pub struct StepEnv<'a> {
    pub map: &'a RoadMap,
    pub grid: &'a RegionGrid,
    pub pool: &'a LookupTablePool,
    pub vehicles: &'a VehicleRegistry,
    pub settings: &'a SimSettings,
    pub mix_zones: &'a [MixZone],
    pub telemetry: &'a Telemetry,
    pub privacy_log: &'a dyn LogSink,
    pub attack_log: &'a dyn LogSink,
    /// Time being computed.
    pub now: u64,
}

impl<'a> StepEnv<'a> {
    pub fn new(
        ctx: &'a SimContext,
        settings: &'a SimSettings,
        mix_zones: &'a [MixZone],
        now: u64,
    ) -> Self {
        Self {
            map: ctx.map(),
            grid: ctx.grid(),
            pool: ctx.lookup_pool(),
            vehicles: ctx.vehicles(),
            settings,
            mix_zones,
            telemetry: ctx.telemetry(),
            privacy_log: ctx.privacy_log(),
            attack_log: ctx.attack_log(),
            now,
        }
    }

    /// How far a vehicle can be outside its registered region before the
    /// migration is applied.
    pub fn region_slack(&self) -> f64 {
        self.map.max_speed() * TICK_MS as f64 / 1000.0
    }
}

/// Counts one tick down on `countdown`; `true` once per `interval`.
pub(crate) fn interval_elapsed(countdown: &mut u64, interval: u64) -> bool {
    if *countdown > TICK_MS {
        *countdown -= TICK_MS;
        false
    } else {
        *countdown = interval.max(TICK_MS);
        true
    }
}

/// First phase of a tick for one vehicle.
///
/// Returns the region the vehicle has to move to, if it left its own.
pub fn advance(vehicle: &mut Vehicle, env: &StepEnv<'_>) -> Option<usize> {
    if !vehicle.active {
        vehicle.inbox.clear();
        return None;
    }

    maintenance::expire(vehicle, env);
    messaging::process_inbox(vehicle, env);
    movement::drive(vehicle, env);
    messaging::detect_jam(vehicle, env);

    if interval_elapsed(
        &mut vehicle.communication_countdown,
        env.settings.communication_interval_ms,
    ) {
        movement::retry_route(vehicle, env);
        messaging::forward_carried(vehicle, env);
    }
    if env.settings.beacons_active()
        && interval_elapsed(&mut vehicle.beacon_countdown, env.settings.beacon_interval_ms)
    {
        vehicle.beacon_due = true;
    }
    privacy::update_mix_zone(vehicle, env);

    let region = env.grid.locate(&vehicle.position);
    (region != vehicle.region).then_some(region)
}

/// Recalculates the route now, keeping the old one if that fails.
pub(crate) fn reroute_now(vehicle: &mut Vehicle, env: &StepEnv<'_>, direction: TravelDirection) {
    match vehicle.reroute(env.map, env.pool, env.settings.routing_mode, direction) {
        Ok(()) => env.telemetry.incr(Counter::Reroutes),
        Err(err) => {
            env.telemetry.incr(Counter::RouteFailures);
            debug!(vehicle = vehicle.id, error = %err, "reroute failed; keeping route");
        }
    }
}
