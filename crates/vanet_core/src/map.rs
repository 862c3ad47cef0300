//! Planar road graph: junctions, streets and per-direction lane markers.
//!
//! Coordinates are plain map units. Street length is always the Euclidean
//! distance between its two end nodes, so straight-line distance is an
//! admissible routing heuristic.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::events::EventId;

pub type NodeId = u32;
pub type StreetId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_sq(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    pub fn distance(&self, other: &Point) -> f64 {
        self.distance_sq(other).sqrt()
    }
}

/// Travel direction relative to a street's start → end orientation.
///
/// Used for routing restrictions, penalties and blockings alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreetDirection {
    #[default]
    Both,
    /// Start node toward end node.
    Forward,
    /// End node toward start node.
    Backward,
}

impl StreetDirection {
    pub fn allows_forward(self) -> bool {
        matches!(self, StreetDirection::Both | StreetDirection::Forward)
    }

    pub fn allows_backward(self) -> bool {
        matches!(self, StreetDirection::Both | StreetDirection::Backward)
    }

    pub fn matches(self, forward: bool) -> bool {
        if forward {
            self.allows_forward()
        } else {
            self.allows_backward()
        }
    }

    pub fn of(forward: bool) -> Self {
        if forward {
            StreetDirection::Forward
        } else {
            StreetDirection::Backward
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub position: Point,
    /// Anonymity radius when the junction is a mix zone.
    pub mix_zone_radius: Option<f64>,
    pub traffic_light: bool,
}

impl Node {
    pub fn is_mix_zone(&self) -> bool {
        self.mix_zone_radius.is_some_and(|r| r > 0.0)
    }
}

/// A static blockage of one lane at a street offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneMarker {
    pub event: EventId,
    /// 1-based lane number.
    pub lane: u8,
    pub offset: f64,
}

#[derive(Debug, Default)]
pub struct LaneMarkers {
    pub forward: Vec<LaneMarker>,
    pub backward: Vec<LaneMarker>,
}

impl LaneMarkers {
    fn side(&self, forward: bool) -> &Vec<LaneMarker> {
        if forward {
            &self.forward
        } else {
            &self.backward
        }
    }

    fn side_mut(&mut self, forward: bool) -> &mut Vec<LaneMarker> {
        if forward {
            &mut self.forward
        } else {
            &mut self.backward
        }
    }
}

#[derive(Debug)]
pub struct Street {
    pub id: StreetId,
    pub start: NodeId,
    pub end: NodeId,
    pub start_pos: Point,
    pub end_pos: Point,
    pub length: f64,
    pub lanes: u8,
    /// Speed limit in map units per second.
    pub speed: f64,
    pub oneway: bool,
    pub name: String,
    markers: RwLock<LaneMarkers>,
}

impl Street {
    /// Point at `offset` units from the start node, clamped to the street.
    pub fn point_at(&self, offset: f64) -> Point {
        if self.length <= 0.0 {
            return self.start_pos;
        }
        let t = (offset / self.length).clamp(0.0, 1.0);
        Point::new(
            self.start_pos.x + (self.end_pos.x - self.start_pos.x) * t,
            self.start_pos.y + (self.end_pos.y - self.start_pos.y) * t,
        )
    }

    /// Closest point on the street to `p`: `(offset, point, squared distance)`.
    pub fn project(&self, p: &Point) -> (f64, Point, f64) {
        let dx = self.end_pos.x - self.start_pos.x;
        let dy = self.end_pos.y - self.start_pos.y;
        let len_sq = dx * dx + dy * dy;
        let t = if len_sq > 0.0 {
            (((p.x - self.start_pos.x) * dx + (p.y - self.start_pos.y) * dy) / len_sq)
                .clamp(0.0, 1.0)
        } else {
            0.0
        };
        let on = Point::new(self.start_pos.x + dx * t, self.start_pos.y + dy * t);
        (self.start_pos.distance(&on), on, on.distance_sq(p))
    }

    pub fn allows(&self, forward: bool) -> bool {
        forward || !self.oneway
    }

    pub fn other_end(&self, node: NodeId) -> NodeId {
        if node == self.start {
            self.end
        } else {
            self.start
        }
    }

    pub fn markers(&self) -> RwLockReadGuard<'_, LaneMarkers> {
        self.markers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn markers_mut(&self) -> RwLockWriteGuard<'_, LaneMarkers> {
        self.markers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Installs one marker per lane for `event`, clamped to the street's lane count.
    /// Backward markers are skipped on one-way streets. Returns the number installed.
    pub fn install_blocking(
        &self,
        event: EventId,
        offset: f64,
        lanes: u8,
        direction: StreetDirection,
    ) -> usize {
        let lanes = lanes.min(self.lanes);
        let mut markers = self.markers_mut();
        let mut installed = 0;
        for forward in [true, false] {
            if !direction.matches(forward) || !self.allows(forward) {
                continue;
            }
            let side = markers.side_mut(forward);
            for lane in 1..=lanes {
                side.push(LaneMarker {
                    event,
                    lane,
                    offset,
                });
                installed += 1;
            }
        }
        installed
    }

    pub fn remove_blocking(&self, event: EventId) -> usize {
        let mut markers = self.markers_mut();
        let before = markers.forward.len() + markers.backward.len();
        markers.forward.retain(|m| m.event != event);
        markers.backward.retain(|m| m.event != event);
        before - markers.forward.len() - markers.backward.len()
    }

    pub fn blocked_lanes(&self, forward: bool) -> usize {
        self.markers().side(forward).len()
    }

    /// Offset of the nearest blockage at or ahead of `offset` that covers every lane.
    pub fn blocking_ahead(&self, forward: bool, offset: f64) -> Option<f64> {
        let markers = self.markers();
        let side = markers.side(forward);
        let mut best: Option<f64> = None;
        for marker in side {
            let ahead = if forward {
                marker.offset >= offset
            } else {
                marker.offset <= offset
            };
            if !ahead {
                continue;
            }
            let covered = side
                .iter()
                .filter(|m| m.event == marker.event)
                .map(|m| m.lane)
                .max()
                .unwrap_or(0);
            if covered < self.lanes {
                continue;
            }
            best = match best {
                Some(b) if forward && b <= marker.offset => Some(b),
                Some(b) if !forward && b >= marker.offset => Some(b),
                _ => Some(marker.offset),
            };
        }
        best
    }
}

/// Immutable street graph with adjacency lists.
#[derive(Debug, Default)]
pub struct RoadMap {
    nodes: Vec<Node>,
    streets: Vec<Street>,
    adjacency: Vec<Vec<StreetId>>,
    min: Point,
    max: Point,
    max_speed: f64,
}

impl RoadMap {
    pub fn builder() -> RoadMapBuilder {
        RoadMapBuilder::default()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id as usize)
    }

    pub fn street(&self, id: StreetId) -> Option<&Street> {
        self.streets.get(id as usize)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn streets(&self) -> &[Street] {
        &self.streets
    }

    /// Streets touching `node`.
    pub fn streets_at(&self, node: NodeId) -> &[StreetId] {
        self.adjacency
            .get(node as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn bounds(&self) -> (Point, Point) {
        (self.min, self.max)
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }
}

#[derive(Debug, Default)]
pub struct RoadMapBuilder {
    nodes: Vec<Node>,
    streets: Vec<Street>,
}

impl RoadMapBuilder {
    pub fn add_node(&mut self, x: f64, y: f64) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(Node {
            id,
            position: Point::new(x, y),
            mix_zone_radius: None,
            traffic_light: false,
        });
        id
    }

    pub fn set_mix_zone(&mut self, node: NodeId, radius: f64) -> SimResult<()> {
        let entry = self
            .nodes
            .get_mut(node as usize)
            .ok_or_else(|| SimError::malformed("mix zone", node as usize, "unknown node"))?;
        entry.mix_zone_radius = Some(radius);
        Ok(())
    }

    pub fn set_traffic_light(&mut self, node: NodeId) {
        if let Some(entry) = self.nodes.get_mut(node as usize) {
            entry.traffic_light = true;
        }
    }

    pub fn add_street(
        &mut self,
        start: NodeId,
        end: NodeId,
        lanes: u8,
        speed: f64,
        oneway: bool,
    ) -> SimResult<StreetId> {
        self.add_named_street(start, end, lanes, speed, oneway, String::new())
    }

    pub fn add_named_street(
        &mut self,
        start: NodeId,
        end: NodeId,
        lanes: u8,
        speed: f64,
        oneway: bool,
        name: String,
    ) -> SimResult<StreetId> {
        let index = self.streets.len();
        let start_pos = self
            .nodes
            .get(start as usize)
            .map(|n| n.position)
            .ok_or_else(|| SimError::malformed("street", index, "unknown start node"))?;
        let end_pos = self
            .nodes
            .get(end as usize)
            .map(|n| n.position)
            .ok_or_else(|| SimError::malformed("street", index, "unknown end node"))?;
        if start == end {
            return Err(SimError::malformed("street", index, "start equals end"));
        }
        if lanes == 0 {
            return Err(SimError::malformed("street", index, "needs at least one lane"));
        }
        if !(speed > 0.0) {
            return Err(SimError::malformed("street", index, "speed must be positive"));
        }
        let id = index as StreetId;
        self.streets.push(Street {
            id,
            start,
            end,
            start_pos,
            end_pos,
            length: start_pos.distance(&end_pos),
            lanes,
            speed,
            oneway,
            name,
            markers: RwLock::new(LaneMarkers::default()),
        });
        Ok(id)
    }

    pub fn build(self) -> RoadMap {
        let mut adjacency = vec![Vec::new(); self.nodes.len()];
        for street in &self.streets {
            adjacency[street.start as usize].push(street.id);
            adjacency[street.end as usize].push(street.id);
        }
        let (mut min, mut max) = (Point::new(0.0, 0.0), Point::new(0.0, 0.0));
        if let Some(first) = self.nodes.first() {
            min = first.position;
            max = first.position;
        }
        for node in &self.nodes {
            min.x = min.x.min(node.position.x);
            min.y = min.y.min(node.position.y);
            max.x = max.x.max(node.position.x);
            max.y = max.y.max(node.position.y);
        }
        let max_speed = self.streets.iter().map(|s| s.speed).fold(0.0, f64::max);
        RoadMap {
            nodes: self.nodes,
            streets: self.streets,
            adjacency,
            min,
            max,
            max_speed,
        }
    }
}
