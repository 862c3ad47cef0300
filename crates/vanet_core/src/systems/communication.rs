//! Second tick phase: beacons and message delivery.
//!
//! Every vehicle's motion for the tick is final once the mid gate opens, so
//! positions read here are stable. The sender's lock is released before any
//! receiver is locked; no thread ever holds two vehicle locks.

use super::StepEnv;
use crate::map::{NodeId, Point};
use crate::messages::Delivery;
use crate::sinks::hex_id;
use crate::telemetry::Counter;
use crate::vehicle::{Vehicle, VehicleHandle, VehicleId};

#[derive(Debug, Clone, Copy)]
struct Beacon {
    sender: VehicleId,
    pseudonym: i32,
    position: Point,
    speed: f64,
    mix_zone: Option<NodeId>,
}

/// Sends the vehicle's due beacon and queued messages.
pub fn exchange(handle: &VehicleHandle, env: &StepEnv<'_>) {
    let (beacon, outbox) = {
        let mut vehicle = handle.lock();
        if !vehicle.active {
            vehicle.outbox.clear();
            vehicle.beacon_due = false;
            return;
        }
        let beacon = std::mem::take(&mut vehicle.beacon_due).then(|| Beacon {
            sender: vehicle.id,
            pseudonym: vehicle.pseudonym,
            position: vehicle.position,
            speed: vehicle.speed,
            mix_zone: vehicle.mix_zone,
        });
        if beacon.is_some() {
            vehicle.stats.beacons_sent += 1;
        }
        (beacon, vehicle.take_outbox())
    };

    if let Some(beacon) = beacon {
        send_beacon(&beacon, env);
    }
    if outbox.is_empty() {
        return;
    }

    let (sender, position) = (handle.id, handle.lock().position);
    let range = env.settings.communication_range;
    let mut sent = 0u64;
    let mut undelivered = Vec::new();
    for outgoing in outbox {
        match outgoing.delivery {
            Delivery::Broadcast => {
                let reached = for_each_receiver(env, sender, &position, range, |receiver| {
                    receiver.deliver(outgoing.message.clone());
                    true
                });
                env.telemetry.add(Counter::MessagesDelivered, reached as u64);
                sent += 1;
            }
            Delivery::To(peer) => {
                let delivered = env.vehicles.get(peer).is_some_and(|target| {
                    let mut receiver = target.lock();
                    let in_range = receiver.position.distance_sq(&position) <= range * range;
                    if receiver.active && in_range {
                        receiver.deliver(outgoing.message.clone());
                    }
                    receiver.active && in_range
                });
                if delivered {
                    env.telemetry.incr(Counter::MessagesDelivered);
                    sent += 1;
                } else {
                    undelivered.push(outgoing.message);
                }
            }
        }
    }

    env.telemetry.add(Counter::MessagesSent, sent);
    let mut vehicle = handle.lock();
    vehicle.stats.messages_sent += sent;
    // The next hop moved away; try again on the next interval.
    vehicle.carried.extend(undelivered);
}

fn send_beacon(beacon: &Beacon, env: &StepEnv<'_>) {
    let settings = env.settings;
    let encrypted =
        settings.mix_zones_enabled && settings.encrypted_beacons_in_mix && beacon.mix_zone.is_some();

    // Encrypted beacons stay inside their zone; a zone transceiver relays
    // them to the whole zone.
    let (center, range, zone_only) = if encrypted {
        match env.mix_zones.iter().find(|z| Some(z.node) == beacon.mix_zone) {
            Some(zone) if zone.transceiver.is_some() => (zone.center, zone.radius, beacon.mix_zone),
            _ => (beacon.position, settings.communication_range, beacon.mix_zone),
        }
    } else {
        (beacon.position, settings.communication_range, None)
    };

    let received = for_each_receiver(env, beacon.sender, &center, range, |receiver| {
        if zone_only.is_some() && receiver.mix_zone != zone_only {
            return false;
        }
        receiver.receive_beacon(
            beacon.sender,
            beacon.pseudonym,
            beacon.position,
            beacon.speed,
            encrypted,
            env.now,
        );
        log_reception(env, receiver.id, beacon, encrypted);
        true
    });
    env.telemetry.incr(Counter::BeaconsSent);
    env.telemetry.add(Counter::BeaconsReceived, received as u64);
}

/// Attack log line for a beacon heard by `receiver`, if one is due.
fn log_reception(env: &StepEnv<'_>, receiver: VehicleId, beacon: &Beacon, encrypted: bool) {
    let settings = env.settings;
    let Some(attacker) = settings.attacker else {
        return;
    };
    let data = format!(
        "{}:{}:{}:{}:{}",
        hex_id(beacon.pseudonym),
        beacon.position.x.round() as i64,
        beacon.position.y.round() as i64,
        beacon.speed.round() as i64,
        encrypted
    );
    if receiver == attacker {
        if encrypted && !settings.attack_log_encrypted {
            return;
        }
        let kind = if settings.attacked == Some(beacon.sender) {
            "Attacked-Vehicle-Data"
        } else {
            "Other-Vehicle-Data"
        };
        env.attack_log.log(&format!(
            "{}:Source(Attacker):{}:{kind}:{data}",
            env.now,
            hex_id(receiver)
        ));
    } else if settings.attack_log_all {
        env.attack_log.log(&format!(
            "{}:Any Communication:{receiver}:Any-Vehicle Data:{data}",
            env.now
        ));
    }
}

/// Calls `f` for every active vehicle other than `sender` within `range` of
/// `center`. Returns how many calls returned `true`.
fn for_each_receiver(
    env: &StepEnv<'_>,
    sender: VehicleId,
    center: &Point,
    range: f64,
    mut f: impl FnMut(&mut Vehicle) -> bool,
) -> usize {
    let reach = range + env.region_slack();
    let range_sq = range * range;
    let lo = Point::new(center.x - reach, center.y - reach);
    let hi = Point::new(center.x + reach, center.y + reach);
    let mut count = 0;
    for index in env.grid.regions_in_box(&lo, &hi) {
        let Some(region) = env.grid.region(index) else {
            continue;
        };
        for handle in region.vehicle_snapshot().iter() {
            if handle.id == sender {
                continue;
            }
            let mut receiver = handle.lock();
            if !receiver.active || receiver.position.distance_sq(center) > range_sq {
                continue;
            }
            if f(&mut receiver) {
                count += 1;
            }
        }
    }
    count
}
