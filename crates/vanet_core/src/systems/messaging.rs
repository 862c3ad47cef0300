//! Penalty messages: handling received ones, reporting jams and forwarding.
//!
//! A message addressed to an area is applied by vehicles inside the area. Any
//! other holder carries it and hands it on each communication interval: to
//! everyone in range when flooding, otherwise to the known neighbour closest
//! to the destination. Without such a neighbour the message stays with the
//! carrier until it expires.

use tracing::debug;

use super::{reroute_now, StepEnv};
use crate::clock::TICK_MS;
use crate::map::StreetDirection;
use crate::messages::{Delivery, Message, Outgoing, PenaltyNotice};
use crate::scenario::JAM_MESSAGE_VALIDITY_MS;
use crate::telemetry::Counter;
use crate::vehicle::Vehicle;

/// Applies a penalty and reroutes when it touches the remaining route.
pub(crate) fn apply_notice(vehicle: &mut Vehicle, env: &StepEnv<'_>, notice: &PenaltyNotice, direction: StreetDirection) {
    let remaining = vehicle.remaining_legs().to_vec();
    if vehicle.penalties.update_penalty(
        notice.street,
        notice.direction,
        notice.value,
        notice.penalty_valid_until,
        &remaining,
    ) {
        reroute_now(vehicle, env, direction);
    }
}

/// Handles messages delivered during the previous tick, in `(key, sender)` order.
pub fn process_inbox(vehicle: &mut Vehicle, env: &StepEnv<'_>) {
    if vehicle.inbox.is_empty() {
        return;
    }
    let mut inbox = std::mem::take(&mut vehicle.inbox);
    inbox.sort_by_key(|m| (m.key(), m.sender()));

    for message in inbox {
        let key = message.key();
        if message.is_expired(env.now) || vehicle.seen.contains_key(&key) {
            continue;
        }
        vehicle.seen.insert(key, message.valid_until());
        vehicle.stats.messages_received += 1;

        if message.is_for(&vehicle.position) {
            let Message::Penalty { notice, .. } = &message;
            let heading = vehicle.heading();
            apply_notice(vehicle, env, notice, heading);
            if message.is_flooding() {
                vehicle.carried.push(message);
            }
        } else {
            vehicle.carried.push(message);
        }
    }
}

/// Reports the vehicle's street as jammed after standing still long enough.
///
/// The vehicle records the penalty itself. Its own street is the current leg,
/// so this never reroutes it.
/// With communication on, the announcement is broadcast on the next
/// communication interval.
pub fn detect_jam(vehicle: &mut Vehicle, env: &StepEnv<'_>) {
    let standing = vehicle.route.is_some() && vehicle.wait_ms == 0 && vehicle.speed == 0.0;
    if !standing {
        vehicle.standing_ms = 0;
        vehicle.jam_reported = false;
        return;
    }
    vehicle.standing_ms += TICK_MS;
    if vehicle.jam_reported || vehicle.standing_ms < env.settings.jam_threshold_ms {
        return;
    }
    let Some(leg) = vehicle.current_leg().copied() else {
        return;
    };
    vehicle.jam_reported = true;
    env.telemetry.incr(Counter::JamsReported);
    debug!(vehicle = vehicle.id, street = leg.street, standing_ms = vehicle.standing_ms, "jam detected");

    let valid_until = env.now + JAM_MESSAGE_VALIDITY_MS;
    let notice = PenaltyNotice {
        street: leg.street,
        direction: StreetDirection::of(leg.forward),
        value: env.settings.jam_penalty,
        penalty_valid_until: valid_until,
    };
    apply_notice(vehicle, env, &notice, StreetDirection::Both);

    if !env.settings.communication_enabled {
        return;
    }
    let key = vehicle.next_message_key();
    vehicle.seen.insert(key, valid_until);
    vehicle.carried.push(Message::Penalty {
        key,
        sender: vehicle.id,
        destination: vehicle.position,
        radius: env.settings.jam_message_radius,
        valid_until,
        flooding: env.settings.message_flooding,
        notice,
    });
    vehicle.communication_countdown = 0;
}

/// Moves carried messages to the outbox. Runs once per communication interval.
pub fn forward_carried(vehicle: &mut Vehicle, env: &StepEnv<'_>) {
    if vehicle.carried.is_empty() {
        return;
    }
    if !env.settings.communication_enabled {
        vehicle.carried.clear();
        return;
    }
    let carried = std::mem::take(&mut vehicle.carried);
    for message in carried {
        if message.is_expired(env.now) {
            continue;
        }
        let inside = message.is_for(&vehicle.position);
        if message.is_flooding() || (inside && message.key().origin == vehicle.id) {
            vehicle.outbox.push(Outgoing {
                delivery: Delivery::Broadcast,
                message: message.forwarded_by(vehicle.id),
            });
        } else if inside {
            // Carried into the destination area.
            let Message::Penalty { notice, .. } = &message;
            let heading = vehicle.heading();
            apply_notice(vehicle, env, notice, heading);
        } else {
            let next_hop = vehicle
                .known
                .find_nearest(
                    &vehicle.position,
                    &message.destination(),
                    env.settings.communication_range,
                )
                .map(|peer| peer.vehicle);
            match next_hop {
                Some(peer) => vehicle.outbox.push(Outgoing {
                    delivery: Delivery::To(peer),
                    message: message.forwarded_by(vehicle.id),
                }),
                None => vehicle.carried.push(message),
            }
        }
    }
}
