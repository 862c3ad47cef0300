//! Street-snapped route endpoints.

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::map::{Point, RoadMap, StreetId};
use crate::spatial::RegionGrid;

/// Maximum distance between a raw coordinate and the street it snaps to.
pub const SNAP_RADIUS: f64 = 1000.0;

/// A point on a street. Routing only ever operates on these.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WayPoint {
    pub position: Point,
    pub street: StreetId,
    /// Euclidean distance from the street's start node.
    pub offset: f64,
    /// Time to wait after arriving here, in ms.
    pub wait_ms: u64,
}

impl WayPoint {
    /// Snaps `(x, y)` to the nearest street of the map.
    pub fn snap(map: &RoadMap, x: f64, y: f64, wait_ms: u64) -> SimResult<Self> {
        let raw = Point::new(x, y);
        let radius_sq = SNAP_RADIUS * SNAP_RADIUS;
        let mut best: Option<(StreetId, Point, f64)> = None;
        for street in map.streets() {
            let (_, on, dist_sq) = street.project(&raw);
            if dist_sq > radius_sq {
                continue;
            }
            if best.map_or(true, |(_, _, best_sq)| dist_sq < best_sq) {
                best = Some((street.id, on, dist_sq));
            }
        }
        let (street, on, _) = best.ok_or_else(|| SimError::snap_failed(raw, SNAP_RADIUS))?;
        Self::on_street(map, street, on, wait_ms)
    }

    /// Same as [`snap`](Self::snap) but only searches the regions around the point.
    pub fn snap_in(
        grid: &RegionGrid,
        map: &RoadMap,
        x: f64,
        y: f64,
        wait_ms: u64,
    ) -> SimResult<Self> {
        let raw = Point::new(x, y);
        let (street, _, on, _) = grid
            .nearest_street(map, &raw, SNAP_RADIUS)
            .ok_or_else(|| SimError::snap_failed(raw, SNAP_RADIUS))?;
        Self::on_street(map, street, on, wait_ms)
    }

    /// Way point at a point known to lie on `street`.
    pub fn on_street(map: &RoadMap, street: StreetId, position: Point, wait_ms: u64) -> SimResult<Self> {
        let street_ref = map
            .street(street)
            .ok_or_else(|| SimError::malformed("way point", street as usize, "unknown street"))?;
        Ok(Self {
            position,
            street,
            offset: street_ref.start_pos.distance(&position),
            wait_ms,
        })
    }

    /// Way point `offset` units along `street`.
    pub fn at_offset(map: &RoadMap, street: StreetId, offset: f64, wait_ms: u64) -> SimResult<Self> {
        let street_ref = map
            .street(street)
            .ok_or_else(|| SimError::malformed("way point", street as usize, "unknown street"))?;
        let offset = offset.clamp(0.0, street_ref.length);
        Ok(Self {
            position: street_ref.point_at(offset),
            street,
            offset,
            wait_ms,
        })
    }
}
