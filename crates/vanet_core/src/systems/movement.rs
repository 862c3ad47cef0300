//! Movement along the planned route.
//!
//! A vehicle covers at most `min(max_speed, street speed) × tick` per tick,
//! following its legs in order. It stops in front of a blockage that covers
//! every lane of its direction. At the end of the route it waits at the
//! reached way point and routes to the next one, or parks for good when none
//! is left.

use tracing::debug;

use super::StepEnv;
use crate::clock::TICK_MS;
use crate::telemetry::Counter;
use crate::vehicle::Vehicle;

const SECONDS_PER_TICK: f64 = TICK_MS as f64 / 1000.0;

pub fn drive(vehicle: &mut Vehicle, env: &StepEnv<'_>) {
    if vehicle.wait_ms > 0 {
        vehicle.wait_ms = vehicle.wait_ms.saturating_sub(TICK_MS);
        vehicle.speed = 0.0;
        return;
    }
    if vehicle.route.is_none() {
        retry_route(vehicle, env);
        if vehicle.route.is_none() {
            vehicle.speed = 0.0;
            return;
        }
    }

    let mut moved = 0.0;
    let mut budget: Option<f64> = None;
    loop {
        let Some(leg) = vehicle.current_leg().copied() else {
            break;
        };
        let Some(street) = env.map.street(leg.street) else {
            vehicle.clear_route();
            break;
        };
        let budget = budget.get_or_insert(vehicle.max_speed.min(street.speed) * SECONDS_PER_TICK);
        vehicle.street = leg.street;

        let remaining = (leg.to_offset - vehicle.offset).abs();
        let mut step = remaining.min(*budget);
        let mut blocked = false;
        if let Some(block) = street.blocking_ahead(leg.forward, vehicle.offset) {
            let gap = (block - vehicle.offset).abs();
            if leg.covers(block) && gap <= step {
                step = gap;
                blocked = true;
            }
        }

        let reached = !blocked && step >= remaining;
        if reached {
            vehicle.offset = leg.to_offset;
        } else if leg.forward {
            vehicle.offset += step;
        } else {
            vehicle.offset -= step;
        }
        *budget -= step;
        moved += step;
        if !reached {
            break;
        }

        let next_leg = vehicle.route.as_ref().and_then(|r| r.legs.get(vehicle.leg + 1)).copied();
        match next_leg {
            Some(next) => {
                vehicle.leg += 1;
                vehicle.street = next.street;
                vehicle.offset = next.from_offset;
                if *budget <= 0.0 {
                    break;
                }
            }
            None => {
                arrive(vehicle, env);
                break;
            }
        }
    }

    if let Some(street) = env.map.street(vehicle.street) {
        vehicle.position = street.point_at(vehicle.offset);
    }
    vehicle.speed = moved / SECONDS_PER_TICK;
    vehicle.stats.distance += moved;
}

/// The route's target was reached.
fn arrive(vehicle: &mut Vehicle, env: &StepEnv<'_>) {
    let reached = vehicle.waypoints.pop_front();
    vehicle.clear_route();
    if let Some(target) = reached {
        vehicle.street = target.street;
        vehicle.offset = target.offset;
        vehicle.wait_ms = target.wait_ms;
    }
    if vehicle.waypoints.is_empty() {
        vehicle.active = false;
        env.telemetry.incr(Counter::Arrivals);
        debug!(vehicle = vehicle.id, time = env.now, "reached final way point");
        return;
    }
    vehicle.retry_route_at = None;
    retry_route(vehicle, env);
}

/// Plans a route if the vehicle has none and its retry time has come.
pub fn retry_route(vehicle: &mut Vehicle, env: &StepEnv<'_>) {
    if vehicle.route.is_some() || vehicle.waypoints.is_empty() {
        return;
    }
    if vehicle.retry_route_at.is_some_and(|at| env.now < at) {
        return;
    }
    match vehicle.plan(env.map, env.pool, env.settings.routing_mode) {
        Ok(_) => {}
        Err(err) => {
            env.telemetry.incr(Counter::RouteFailures);
            vehicle.retry_route_at = Some(env.now + env.settings.communication_interval_ms);
            debug!(vehicle = vehicle.id, error = %err, "no route; retrying later");
        }
    }
}
