//! Knowledge upkeep at the start of a vehicle's step.

use super::{reroute_now, StepEnv};
use crate::vehicle::Vehicle;

/// Forgets peers not heard from recently, message keys past their validity
/// and elapsed penalties. An elapsed penalty that shaped the route triggers
/// one recalculation.
pub fn expire(vehicle: &mut Vehicle, env: &StepEnv<'_>) {
    let now = env.now;
    vehicle.known.prune_expired(now);
    vehicle.seen.retain(|_, valid_until| *valid_until >= now);
    if vehicle.penalties.check_expiry(now) {
        let heading = vehicle.heading();
        reroute_now(vehicle, env, heading);
    }
}
