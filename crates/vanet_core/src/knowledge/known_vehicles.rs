//! Peers learned from beacons, hashed into a fixed number of buckets.

use crate::map::Point;
use crate::vehicle::VehicleId;

pub const KNOWN_VEHICLE_BUCKETS: usize = 32;

/// How long a beacon keeps its sender known.
pub const KNOWN_VEHICLE_TTL_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KnownVehicle {
    /// Handle of the sending vehicle, used to address messages.
    pub vehicle: VehicleId,
    /// Identifier carried in the beacon (pseudonym).
    pub id: i32,
    pub x: f64,
    pub y: f64,
    pub speed: f64,
    pub encrypted: bool,
    pub expires_at: u64,
}

impl KnownVehicle {
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

#[derive(Debug, Clone)]
pub struct KnownVehiclesList {
    buckets: Vec<Vec<KnownVehicle>>,
    len: usize,
}

impl Default for KnownVehiclesList {
    fn default() -> Self {
        Self {
            buckets: vec![Vec::new(); KNOWN_VEHICLE_BUCKETS],
            len: 0,
        }
    }
}

fn bucket_of(id: i32) -> usize {
    id.rem_euclid(KNOWN_VEHICLE_BUCKETS as i32) as usize
}

impl KnownVehiclesList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Refreshes the entry for `id` or inserts a new one. Either way it expires
    /// [`KNOWN_VEHICLE_TTL_MS`] after `now`.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        vehicle: VehicleId,
        id: i32,
        x: f64,
        y: f64,
        speed: f64,
        encrypted: bool,
        now: u64,
    ) {
        let expires_at = now + KNOWN_VEHICLE_TTL_MS;
        let bucket = &mut self.buckets[bucket_of(id)];
        if let Some(entry) = bucket.iter_mut().find(|e| e.id == id) {
            entry.vehicle = vehicle;
            entry.x = x;
            entry.y = y;
            entry.speed = speed;
            entry.encrypted = encrypted;
            entry.expires_at = expires_at;
            return;
        }
        bucket.push(KnownVehicle {
            vehicle,
            id,
            x,
            y,
            speed,
            encrypted,
            expires_at,
        });
        self.len += 1;
    }

    pub fn get(&self, id: i32) -> Option<&KnownVehicle> {
        self.buckets[bucket_of(id)].iter().find(|e| e.id == id)
    }

    /// Drops every entry whose expiry is at or before `now`. Returns the number removed.
    pub fn prune_expired(&mut self, now: u64) -> usize {
        let mut removed = 0;
        for bucket in &mut self.buckets {
            let before = bucket.len();
            bucket.retain(|e| e.expires_at > now);
            removed += before - bucket.len();
        }
        self.len -= removed;
        removed
    }

    /// Peer closest to `toward` that is strictly closer to it than `from` and
    /// strictly within `max_distance` of `from`. Ties go to the lowest vehicle handle.
    pub fn find_nearest(&self, from: &Point, toward: &Point, max_distance: f64) -> Option<&KnownVehicle> {
        let max_sq = max_distance * max_distance;
        let mut best_sq = from.distance_sq(toward);
        let mut best: Option<&KnownVehicle> = None;
        for entry in self.iter() {
            let position = entry.position();
            let to_target = position.distance_sq(toward);
            let closer = to_target < best_sq
                || (to_target == best_sq && best.is_some_and(|b| entry.vehicle < b.vehicle));
            if closer && position.distance_sq(from) < max_sq {
                best_sq = to_target;
                best = Some(entry);
            }
        }
        best
    }

    /// Entries within `max_distance` of `from`, ordered by vehicle handle.
    pub fn within(&self, from: &Point, max_distance: f64) -> Vec<&KnownVehicle> {
        let max_sq = max_distance * max_distance;
        let mut found: Vec<&KnownVehicle> = self
            .iter()
            .filter(|e| e.position().distance_sq(from) < max_sq)
            .collect();
        found.sort_by_key(|e| e.vehicle);
        found
    }

    pub fn iter(&self) -> impl Iterator<Item = &KnownVehicle> {
        self.buckets.iter().flatten()
    }

    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_ids_fold_into_valid_buckets() {
        assert_eq!(bucket_of(-1), 31);
        assert_eq!(bucket_of(-32), 0);
        assert_eq!(bucket_of(i32::MIN), 0);
        assert_eq!(bucket_of(33), 1);
    }

    #[test]
    fn update_refreshes_existing_entry() {
        let mut known = KnownVehiclesList::new();
        known.update(1, 7, 0.0, 0.0, 5.0, false, 100);
        known.update(1, 7, 10.0, 0.0, 6.0, true, 400);
        assert_eq!(known.len(), 1);
        let entry = known.get(7).expect("entry");
        assert_eq!(entry.x, 10.0);
        assert!(entry.encrypted);
        assert_eq!(entry.expires_at, 1400);
    }

    #[test]
    fn colliding_ids_share_a_bucket() {
        let mut known = KnownVehiclesList::new();
        known.update(1, 3, 0.0, 0.0, 0.0, false, 0);
        known.update(2, 35, 0.0, 0.0, 0.0, false, 0);
        known.update(3, -29, 0.0, 0.0, 0.0, false, 0);
        assert_eq!(known.len(), 3);
        assert_eq!(known.buckets[3].len(), 3);
        assert_eq!(known.get(35).map(|e| e.vehicle), Some(2));
    }

    #[test]
    fn prune_removes_entries_expiring_at_or_before_now() {
        let mut known = KnownVehiclesList::new();
        known.update(1, 1, 0.0, 0.0, 0.0, false, 0);
        known.update(2, 2, 0.0, 0.0, 0.0, false, 500);
        assert_eq!(known.prune_expired(999), 0);
        assert_eq!(known.prune_expired(1000), 1);
        assert!(known.get(1).is_none());
        assert_eq!(known.len(), 1);
        assert_eq!(known.prune_expired(1500), 1);
        assert!(known.is_empty());
    }

    #[test]
    fn find_nearest_prefers_progress_toward_target() {
        let mut known = KnownVehiclesList::new();
        let me = Point::new(0.0, 0.0);
        let target = Point::new(1000.0, 0.0);
        known.update(1, 1, 300.0, 0.0, 0.0, false, 0);
        known.update(2, 2, 450.0, 100.0, 0.0, false, 0);
        known.update(3, 3, -100.0, 0.0, 0.0, false, 0);
        known.update(4, 4, 900.0, 0.0, 0.0, false, 0);

        let best = known.find_nearest(&me, &target, 500.0).expect("peer");
        assert_eq!(best.vehicle, 2);
        let best = known.find_nearest(&me, &target, 1000.0).expect("peer");
        assert_eq!(best.vehicle, 4);
        assert!(known.find_nearest(&me, &target, 100.0).is_none());
    }

    #[test]
    fn find_nearest_never_returns_a_peer_further_from_target() {
        let mut known = KnownVehiclesList::new();
        known.update(5, 5, -50.0, 0.0, 0.0, false, 0);
        let found = known.find_nearest(&Point::new(0.0, 0.0), &Point::new(100.0, 0.0), 500.0);
        assert!(found.is_none());
    }
}
