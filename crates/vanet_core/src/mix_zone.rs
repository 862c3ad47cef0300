//! Mix zones: circular areas around junctions where vehicle identity is hidden.
//!
//! The geometry precomputation finds every point where a zone's boundary
//! crosses a street. Those crossings are written to the privacy log as two
//! lines per zone (x and y coordinates), deduplicated across regions.

use std::collections::BTreeSet;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::map::{NodeId, Point, RoadMap, StreetId};
use crate::sinks::LogSink;
use crate::spatial::RegionGrid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MixZone {
    pub node: NodeId,
    pub center: Point,
    pub radius: f64,
    /// Road-side unit relaying encrypted beacons inside the zone.
    pub transceiver: Option<u32>,
}

impl MixZone {
    pub fn contains(&self, p: &Point) -> bool {
        self.center.distance_sq(p) <= self.radius * self.radius
    }
}

/// Boundary crossings of one zone.
#[derive(Debug, Clone, PartialEq)]
pub struct MixZoneCrossings {
    pub node: NodeId,
    pub radius: f64,
    pub points: Vec<(StreetId, Point)>,
}

impl MixZoneCrossings {
    /// `Mix-Zone(x)` and `Mix-Zone(y)` log lines.
    pub fn log_lines(&self) -> [String; 2] {
        let mut x_line = format!("Mix-Zone(x):Node ID:{}:Radius:{}", self.node, self.radius.round() as i64);
        let mut y_line = format!("Mix-Zone(y):Node ID:{}:Radius:{}", self.node, self.radius.round() as i64);
        for (_, p) in &self.points {
            x_line.push_str(&format!(":{}", p.x.round() as i64));
            y_line.push_str(&format!(":{}", p.y.round() as i64));
        }
        [x_line, y_line]
    }
}

/// Points where the circle `(center, radius)` crosses segment `a`–`b`.
///
/// With `d = b - a` and `f = a - center`, points `a + t·d` on the circle solve
/// `(d·d)t² + 2(f·d)t + (f·f - r²) = 0`; roots with `t ∈ [0, 1]` lie on the segment.
pub fn circle_segment_intersections(center: &Point, radius: f64, a: &Point, b: &Point) -> Vec<Point> {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let fx = a.x - center.x;
    let fy = a.y - center.y;

    let qa = dx * dx + dy * dy;
    if qa == 0.0 {
        return Vec::new();
    }
    let qb = 2.0 * (fx * dx + fy * dy);
    let qc = fx * fx + fy * fy - radius * radius;
    let disc = qb * qb - 4.0 * qa * qc;
    if disc < 0.0 {
        return Vec::new();
    }

    let at = |t: f64| Point::new(a.x + t * dx, a.y + t * dy);
    let on_segment = |t: f64| (0.0..=1.0).contains(&t);
    if disc == 0.0 {
        let t = -qb / (2.0 * qa);
        return if on_segment(t) { vec![at(t)] } else { Vec::new() };
    }
    let root = disc.sqrt();
    let t1 = (-qb - root) / (2.0 * qa);
    let t2 = (-qb + root) / (2.0 * qa);
    [t1, t2].into_iter().filter(|t| on_segment(*t)).map(at).collect()
}

/// Crossings of one zone with every street in the regions it overlaps.
pub fn compute_crossings(map: &RoadMap, grid: &RegionGrid, zone: &MixZone) -> MixZoneCrossings {
    let streets: BTreeSet<StreetId> = grid
        .regions_in_circle(&zone.center, zone.radius)
        .into_iter()
        .filter_map(|index| grid.region(index))
        .flat_map(|region| region.streets())
        .collect();

    let mut points = Vec::new();
    for street_id in streets {
        let Some(street) = map.street(street_id) else {
            continue;
        };
        for p in circle_segment_intersections(&zone.center, zone.radius, &street.start_pos, &street.end_pos) {
            points.push((street_id, p));
        }
    }
    MixZoneCrossings {
        node: zone.node,
        radius: zone.radius,
        points,
    }
}

/// Computes all zones in parallel and writes their log lines in zone order.
pub fn precompute(map: &RoadMap, grid: &RegionGrid, zones: &[MixZone], sink: &dyn LogSink) -> Vec<MixZoneCrossings> {
    let crossings: Vec<MixZoneCrossings> = zones
        .par_iter()
        .map(|zone| compute_crossings(map, grid, zone))
        .collect();
    for zone in &crossings {
        for line in zone.log_lines() {
            sink.log(&line);
        }
    }
    crossings
}
