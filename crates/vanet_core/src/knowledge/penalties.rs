//! Per-vehicle street penalties received through messages.
//!
//! The registry itself never routes. Its mutating operations report whether
//! the owning vehicle has to recalculate its route, and the vehicle does so
//! immediately and exactly once per report.

use crate::map::{StreetDirection, StreetId};
use crate::routing::{RouteLeg, RoutePenalty};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PenaltyEntry {
    pub street: StreetId,
    pub direction: StreetDirection,
    pub value: f64,
    pub valid_until: u64,
    /// The penalised street/direction lay on the remaining route when last checked.
    pub affects_route: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PenaltyRegistry {
    entries: Vec<PenaltyEntry>,
}

/// The street the vehicle is on (`remaining[0]`) is not checked; it cannot
/// be avoided any more.
fn on_route(street: StreetId, direction: StreetDirection, remaining: &[RouteLeg]) -> bool {
    remaining
        .iter()
        .skip(1)
        .any(|leg| leg.street == street && direction.matches(leg.forward))
}

impl PenaltyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or updates the penalty for `(street, direction)`. Value and
    /// expiry of an existing entry are overwritten.
    ///
    /// Returns `true` when the value is new or changed and the penalised
    /// street lies on `remaining` past the current leg, i.e. the caller must
    /// reroute now.
    pub fn update_penalty(
        &mut self,
        street: StreetId,
        direction: StreetDirection,
        value: f64,
        valid_until: u64,
        remaining: &[RouteLeg],
    ) -> bool {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.street == street && e.direction == direction)
        {
            entry.valid_until = valid_until;
            if entry.value == value {
                return false;
            }
            entry.value = value;
            entry.affects_route = on_route(street, direction, remaining);
            return entry.affects_route;
        }
        let affects_route = on_route(street, direction, remaining);
        self.entries.push(PenaltyEntry {
            street,
            direction,
            value,
            valid_until,
            affects_route,
        });
        affects_route
    }

    /// Removes entries valid only until before `now`. Returns `true` when at least
    /// one removed entry affected the route, so one recalculation is due.
    pub fn check_expiry(&mut self, now: u64) -> bool {
        let mut reroute = false;
        self.entries.retain(|e| {
            if e.valid_until < now {
                reroute |= e.affects_route;
                false
            } else {
                true
            }
        });
        reroute
    }

    /// Re-evaluates route flags after the route changed.
    pub fn refresh_route_flags(&mut self, remaining: &[RouteLeg]) {
        for entry in &mut self.entries {
            entry.affects_route = on_route(entry.street, entry.direction, remaining);
        }
    }

    pub fn route_penalties(&self) -> Vec<RoutePenalty> {
        self.entries
            .iter()
            .map(|e| RoutePenalty {
                street: e.street,
                direction: e.direction,
                cost: e.value,
            })
            .collect()
    }

    pub fn get(&self, street: StreetId, direction: StreetDirection) -> Option<&PenaltyEntry> {
        self.entries
            .iter()
            .find(|e| e.street == street && e.direction == direction)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
