//! Mix-zone membership and pseudonym changes.

use super::StepEnv;
use crate::sinks::hex_id;
use crate::telemetry::Counter;
use crate::vehicle::Vehicle;

/// Tracks the zone the vehicle is in. Leaving a zone switches to a fresh
/// pseudonym, which is written to the privacy log when enabled.
pub fn update_mix_zone(vehicle: &mut Vehicle, env: &StepEnv<'_>) {
    if !env.settings.mix_zones_enabled {
        vehicle.mix_zone = None;
        return;
    }
    let zone = env
        .mix_zones
        .iter()
        .find(|zone| zone.contains(&vehicle.position))
        .map(|zone| zone.node);

    if vehicle.mix_zone.is_some() && zone.is_none() {
        let old = vehicle.change_pseudonym();
        env.telemetry.incr(Counter::PseudonymChanges);
        if env.settings.privacy_logging {
            env.privacy_log.log(&format!(
                "Pseudonym-Change:{}:{}:{}:{}",
                env.now,
                hex_id(vehicle.id),
                hex_id(old),
                hex_id(vehicle.pseudonym)
            ));
        }
    }
    vehicle.mix_zone = zone;
}
