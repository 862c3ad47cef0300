//! Spatial partition: a fixed grid of rectangular regions covering the map.
//!
//! Each [`Region`] owns the junctions, streets, transceivers, mix-zone markers
//! and vehicles located inside it behind its own lock. The vehicle list is
//! cached as a read-only snapshot which is rebuilt lazily after membership
//! changes, so the tick path iterates a stable slice while migrations and
//! interactive edits keep mutating the live list.

use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::map::{NodeId, Point, RoadMap, StreetId};
use crate::vehicle::VehicleHandle;

/// Default edge length of a region in map units.
pub const DEFAULT_REGION_SIZE: f64 = 10_000.0;

/// Fixed road-side unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transceiver {
    pub id: u32,
    pub position: Point,
    pub range: f64,
    /// Mix-zone node this unit relays encrypted beacons for.
    pub mix_zone: Option<NodeId>,
}

#[derive(Debug)]
struct RegionContents {
    nodes: Vec<NodeId>,
    streets: Vec<StreetId>,
    transceivers: Vec<Transceiver>,
    mix_zones: Vec<NodeId>,
    vehicles: Vec<VehicleHandle>,
    vehicles_dirty: bool,
    snapshot: Arc<[VehicleHandle]>,
}

#[derive(Debug)]
pub struct Region {
    pub grid_x: usize,
    pub grid_y: usize,
    pub min: Point,
    pub max: Point,
    contents: Mutex<RegionContents>,
}

impl Region {
    fn new(grid_x: usize, grid_y: usize, min: Point, max: Point) -> Self {
        Self {
            grid_x,
            grid_y,
            min,
            max,
            contents: Mutex::new(RegionContents {
                nodes: Vec::new(),
                streets: Vec::new(),
                transceivers: Vec::new(),
                mix_zones: Vec::new(),
                vehicles: Vec::new(),
                vehicles_dirty: false,
                snapshot: Arc::from(Vec::new()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegionContents> {
        self.contents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_vehicle(&self, handle: VehicleHandle) {
        let mut contents = self.lock();
        contents.vehicles.push(handle);
        contents.vehicles_dirty = true;
    }

    pub fn remove_vehicle(&self, id: u32) -> Option<VehicleHandle> {
        let mut contents = self.lock();
        let index = contents.vehicles.iter().position(|h| h.id == id)?;
        contents.vehicles_dirty = true;
        Some(contents.vehicles.swap_remove(index))
    }

    /// Stable copy of the vehicle list, rebuilt only when membership changed.
    pub fn vehicle_snapshot(&self) -> Arc<[VehicleHandle]> {
        let mut contents = self.lock();
        if contents.vehicles_dirty {
            let mut fresh = contents.vehicles.clone();
            fresh.sort_by_key(|h| h.id);
            contents.snapshot = Arc::from(fresh);
            contents.vehicles_dirty = false;
        }
        Arc::clone(&contents.snapshot)
    }

    pub fn vehicle_count(&self) -> usize {
        self.lock().vehicles.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().vehicles_dirty
    }

    pub fn clear_vehicles(&self) {
        let mut contents = self.lock();
        contents.vehicles.clear();
        contents.vehicles_dirty = true;
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        self.lock().nodes.clone()
    }

    pub fn streets(&self) -> Vec<StreetId> {
        self.lock().streets.clone()
    }

    pub fn add_transceiver(&self, transceiver: Transceiver) {
        self.lock().transceivers.push(transceiver);
    }

    pub fn remove_transceiver(&self, id: u32) -> bool {
        let mut contents = self.lock();
        let before = contents.transceivers.len();
        contents.transceivers.retain(|t| t.id != id);
        before != contents.transceivers.len()
    }

    pub fn transceivers(&self) -> Vec<Transceiver> {
        self.lock().transceivers.clone()
    }

    pub fn add_mix_zone(&self, node: NodeId) {
        let mut contents = self.lock();
        if !contents.mix_zones.contains(&node) {
            contents.mix_zones.push(node);
        }
    }

    pub fn remove_mix_zone(&self, node: NodeId) {
        self.lock().mix_zones.retain(|n| *n != node);
    }

    pub fn mix_zones(&self) -> Vec<NodeId> {
        self.lock().mix_zones.clone()
    }

    pub fn contains(&self, p: &Point) -> bool {
        p.x >= self.min.x && p.x < self.max.x && p.y >= self.min.y && p.y < self.max.y
    }
}

/// Row-major grid of regions. Region index = `grid_y * columns + grid_x`.
#[derive(Debug)]
pub struct RegionGrid {
    columns: usize,
    rows: usize,
    origin: Point,
    cell_width: f64,
    cell_height: f64,
    regions: Vec<Region>,
}

impl RegionGrid {
    /// Grid sized so that regions are roughly `region_size` on each side.
    pub fn for_map(map: &RoadMap, region_size: f64) -> Self {
        let (min, max) = map.bounds();
        let columns = (((max.x - min.x) / region_size).ceil() as usize).max(1);
        let rows = (((max.y - min.y) / region_size).ceil() as usize).max(1);
        Self::new(map, columns, rows)
    }

    pub fn new(map: &RoadMap, columns: usize, rows: usize) -> Self {
        let columns = columns.max(1);
        let rows = rows.max(1);
        let (min, max) = map.bounds();
        // Widen by one unit so points on the max edge fall inside the last row/column.
        let cell_width = ((max.x - min.x) + 1.0) / columns as f64;
        let cell_height = ((max.y - min.y) + 1.0) / rows as f64;

        let mut regions = Vec::with_capacity(columns * rows);
        for grid_y in 0..rows {
            for grid_x in 0..columns {
                let lo = Point::new(
                    min.x + grid_x as f64 * cell_width,
                    min.y + grid_y as f64 * cell_height,
                );
                let hi = Point::new(lo.x + cell_width, lo.y + cell_height);
                regions.push(Region::new(grid_x, grid_y, lo, hi));
            }
        }

        let grid = Self {
            columns,
            rows,
            origin: min,
            cell_width,
            cell_height,
            regions,
        };

        for node in map.nodes() {
            let index = grid.locate(&node.position);
            grid.regions[index].lock().nodes.push(node.id);
            if node.is_mix_zone() {
                if let Some(radius) = node.mix_zone_radius {
                    for index in grid.regions_in_circle(&node.position, radius) {
                        grid.regions[index].add_mix_zone(node.id);
                    }
                }
            }
        }
        for street in map.streets() {
            let lo = Point::new(
                street.start_pos.x.min(street.end_pos.x),
                street.start_pos.y.min(street.end_pos.y),
            );
            let hi = Point::new(
                street.start_pos.x.max(street.end_pos.x),
                street.start_pos.y.max(street.end_pos.y),
            );
            for index in grid.regions_in_box(&lo, &hi) {
                grid.regions[index].lock().streets.push(street.id);
            }
        }
        grid
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn region(&self, index: usize) -> Option<&Region> {
        self.regions.get(index)
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    fn cell_coords(&self, p: &Point) -> (usize, usize) {
        let gx = ((p.x - self.origin.x) / self.cell_width).floor();
        let gy = ((p.y - self.origin.y) / self.cell_height).floor();
        let gx = if gx.is_finite() && gx > 0.0 { gx as usize } else { 0 };
        let gy = if gy.is_finite() && gy > 0.0 { gy as usize } else { 0 };
        (gx.min(self.columns - 1), gy.min(self.rows - 1))
    }

    /// Region owning `p`. Points outside the map are clamped to the border regions.
    pub fn locate(&self, p: &Point) -> usize {
        let (gx, gy) = self.cell_coords(p);
        gy * self.columns + gx
    }

    /// Indices of all regions intersecting the axis-aligned box, in row-major order.
    pub fn regions_in_box(&self, lo: &Point, hi: &Point) -> Vec<usize> {
        let (x0, y0) = self.cell_coords(lo);
        let (x1, y1) = self.cell_coords(hi);
        let mut out = Vec::with_capacity((x1 - x0 + 1) * (y1 - y0 + 1));
        for gy in y0..=y1 {
            for gx in x0..=x1 {
                out.push(gy * self.columns + gx);
            }
        }
        out
    }

    pub fn regions_in_circle(&self, center: &Point, radius: f64) -> Vec<usize> {
        self.regions_in_box(
            &Point::new(center.x - radius, center.y - radius),
            &Point::new(center.x + radius, center.y + radius),
        )
    }

    /// Adds the vehicle to the region owning `position` and returns that region.
    pub fn add_vehicle(&self, handle: VehicleHandle, position: &Point) -> usize {
        let index = self.locate(position);
        self.regions[index].add_vehicle(handle);
        index
    }

    pub fn remove_vehicle(&self, region: usize, id: u32) -> Option<VehicleHandle> {
        self.regions.get(region)?.remove_vehicle(id)
    }

    /// Moves a vehicle between regions. Both regions are locked one after the other.
    pub fn migrate(&self, id: u32, from: usize, to: usize) -> bool {
        match self.remove_vehicle(from, id) {
            Some(handle) => {
                self.regions[to].add_vehicle(handle);
                true
            }
            None => false,
        }
    }

    pub fn vehicle_count(&self) -> usize {
        self.regions.iter().map(Region::vehicle_count).sum()
    }

    /// Nearest street to `p` within `radius`: `(street, offset, snapped point, distance)`.
    pub fn nearest_street(
        &self,
        map: &RoadMap,
        p: &Point,
        radius: f64,
    ) -> Option<(StreetId, f64, Point, f64)> {
        let radius_sq = radius * radius;
        let mut best: Option<(StreetId, f64, Point, f64)> = None;
        for index in self.regions_in_circle(p, radius) {
            for street_id in self.regions[index].streets() {
                let Some(street) = map.street(street_id) else {
                    continue;
                };
                let (offset, on, dist_sq) = street.project(p);
                if dist_sq > radius_sq {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((best_id, _, _, best_sq)) => {
                        dist_sq < best_sq || (dist_sq == best_sq && street_id < best_id)
                    }
                };
                if better {
                    best = Some((street_id, offset, on, dist_sq));
                }
            }
        }
        best.map(|(id, offset, on, dist_sq)| (id, offset, on, dist_sq.sqrt()))
    }
}

/// Splits `total` cells into `workers` contiguous runs of `total / workers`
/// cells each; the remainder is appended to the last run.
pub fn partition(total: usize, workers: usize) -> Vec<Range<usize>> {
    let workers = workers.max(1);
    let per_worker = total / workers;
    (0..workers)
        .map(|w| {
            let start = w * per_worker;
            let end = if w + 1 == workers {
                total
            } else {
                start + per_worker
            };
            start..end
        })
        .collect()
}
