//! A* routing over the street graph.
//!
//! Searches run between two [`WayPoint`]s. The search state lives in a
//! [`LookupTable`](lookup::LookupTable) borrowed from the shared
//! [`LookupTablePool`], so concurrent callers never allocate node-indexed
//! arrays of their own.
//!
//! Open-list ties are broken by lowest estimated total cost, then by insertion
//! order, which keeps results stable for identical inputs.

pub mod lookup;
pub mod waypoint;

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::map::{NodeId, Point, RoadMap, Street, StreetDirection, StreetId};

pub use lookup::{LookupTablePool, NodeState, PooledTable};
pub use waypoint::{WayPoint, SNAP_RADIUS};

/// Direction restriction for the first street of a route.
pub type TravelDirection = StreetDirection;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// Minimise travelled distance.
    #[default]
    Shortest,
    /// Minimise travel time at the streets' speed limits.
    Fastest,
}

/// Extra cost for traversing a street in the given direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoutePenalty {
    pub street: StreetId,
    pub direction: StreetDirection,
    /// Extra cost expressed as additional distance.
    pub cost: f64,
}

/// A stretch of one street travelled in one direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteLeg {
    pub street: StreetId,
    /// Travelled start → end.
    pub forward: bool,
    pub from_offset: f64,
    pub to_offset: f64,
}

impl RouteLeg {
    pub fn length(&self) -> f64 {
        (self.to_offset - self.from_offset).abs()
    }

    /// Whether `offset` lies within this leg's span of the street.
    pub fn covers(&self, offset: f64) -> bool {
        let (lo, hi) = if self.from_offset <= self.to_offset {
            (self.from_offset, self.to_offset)
        } else {
            (self.to_offset, self.from_offset)
        };
        offset >= lo - 1e-6 && offset <= hi + 1e-6
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Junctions passed, in order.
    pub nodes: Vec<NodeId>,
    pub legs: Vec<RouteLeg>,
    /// Total cost in the unit of the routing mode, penalties included.
    pub cost: f64,
    pub target: WayPoint,
}

impl Route {
    pub fn length(&self) -> f64 {
        self.legs.iter().map(RouteLeg::length).sum()
    }

    /// Whether `p` lies on one of the route's legs (within `tolerance` units).
    pub fn contains_point(&self, map: &RoadMap, p: &Point, tolerance: f64) -> bool {
        self.legs.iter().any(|leg| {
            map.street(leg.street).is_some_and(|street| {
                let (offset, _, dist_sq) = street.project(p);
                dist_sq <= tolerance * tolerance && leg.covers(offset)
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct OpenEntry {
    estimate: f64,
    seq: u64,
    node: NodeId,
    cost: f64,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenEntry {}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so BinaryHeap pops the lowest estimate, then the oldest entry.
        other
            .estimate
            .total_cmp(&self.estimate)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy)]
enum Goal {
    /// Start and target share a street and are connected along it.
    Direct,
    /// Reached the target street at `node`, entering it in the given direction.
    Via { node: NodeId, forward: bool },
}

/// Opens `node` at `cost` unless it is closed or already reached more cheaply.
#[allow(clippy::too_many_arguments)]
fn relax(
    table: &mut PooledTable<'_>,
    open: &mut BinaryHeap<OpenEntry>,
    seq: &mut u64,
    node: NodeId,
    cost: f64,
    heuristic: f64,
    predecessor: Option<NodeId>,
    via: (StreetId, bool),
) {
    if let Some(existing) = table.get(node) {
        if existing.closed || existing.cost <= cost {
            return;
        }
    }
    table.set(node, NodeState::open(cost, predecessor, Some(via)));
    open.push(OpenEntry {
        estimate: cost + heuristic,
        seq: *seq,
        node,
        cost,
    });
    *seq += 1;
}

/// Stateless router over one map and one lookup pool.
pub struct Router<'a> {
    map: &'a RoadMap,
    pool: &'a LookupTablePool,
}

impl<'a> Router<'a> {
    pub fn new(map: &'a RoadMap, pool: &'a LookupTablePool) -> Self {
        Self { map, pool }
    }

    fn street(&self, id: StreetId) -> SimResult<&'a Street> {
        self.map
            .street(id)
            .ok_or_else(|| SimError::malformed("way point", id as usize, "unknown street"))
    }

    /// Finds the cheapest route from `start` to `target`.
    ///
    /// `direction` restricts which way the route may leave along the start
    /// street. `penalties` apply to this call only.
    pub fn route(
        &self,
        mode: RoutingMode,
        direction: TravelDirection,
        start: &WayPoint,
        target: &WayPoint,
        penalties: &[RoutePenalty],
    ) -> SimResult<Route> {
        let start_street = self.street(start.street)?;
        let target_street = self.street(target.street)?;

        let mut penalty_index: HashMap<StreetId, Vec<RoutePenalty>> = HashMap::new();
        for penalty in penalties {
            penalty_index.entry(penalty.street).or_default().push(*penalty);
        }
        let cost_of = |street: &Street, forward: bool, distance: f64| -> f64 {
            let extra: f64 = penalty_index
                .get(&street.id)
                .map(|list| {
                    list.iter()
                        .filter(|p| p.direction.matches(forward))
                        .map(|p| p.cost)
                        .sum()
                })
                .unwrap_or(0.0);
            match mode {
                RoutingMode::Shortest => distance + extra,
                RoutingMode::Fastest => (distance + extra) / street.speed,
            }
        };
        let max_speed = self.map.max_speed().max(f64::MIN_POSITIVE);
        let heuristic = |node: NodeId| -> f64 {
            let distance = self
                .map
                .node(node)
                .map(|n| n.position.distance(&target.position))
                .unwrap_or(0.0);
            match mode {
                RoutingMode::Shortest => distance,
                RoutingMode::Fastest => distance / max_speed,
            }
        };

        let mut best: Option<(f64, Goal)> = None;
        if start.street == target.street {
            let forward = target.offset >= start.offset;
            let allowed = direction.matches(forward) && start_street.allows(forward);
            if allowed {
                let cost = cost_of(start_street, forward, (target.offset - start.offset).abs());
                best = Some((cost, Goal::Direct));
            }
        }

        self.pool.ensure_capacity(self.map.node_count());
        let mut table = self.pool.checkout();
        let mut open = BinaryHeap::new();
        let mut seq = 0u64;

        if direction.allows_forward() {
            let cost = cost_of(start_street, true, start_street.length - start.offset);
            let node = start_street.end;
            relax(&mut table, &mut open, &mut seq, node, cost, heuristic(node), None, (start_street.id, true));
        }
        if direction.allows_backward() && start_street.allows(false) {
            let cost = cost_of(start_street, false, start.offset);
            let node = start_street.start;
            relax(&mut table, &mut open, &mut seq, node, cost, heuristic(node), None, (start_street.id, false));
        }

        while let Some(entry) = open.pop() {
            if best.is_some_and(|(cost, _)| entry.estimate >= cost) {
                break;
            }
            let Some(state) = table.get(entry.node).copied() else {
                continue;
            };
            if state.closed || entry.cost > state.cost {
                continue;
            }
            table.close(entry.node);

            if entry.node == target_street.start {
                let cost = state.cost + cost_of(target_street, true, target.offset);
                if best.map_or(true, |(b, _)| cost < b) {
                    best = Some((cost, Goal::Via { node: entry.node, forward: true }));
                }
            }
            if entry.node == target_street.end && target_street.allows(false) {
                let cost =
                    state.cost + cost_of(target_street, false, target_street.length - target.offset);
                if best.map_or(true, |(b, _)| cost < b) {
                    best = Some((cost, Goal::Via { node: entry.node, forward: false }));
                }
            }

            for &street_id in self.map.streets_at(entry.node) {
                let Some(street) = self.map.street(street_id) else {
                    continue;
                };
                let forward = street.start == entry.node;
                if !street.allows(forward) {
                    continue;
                }
                let next = street.other_end(entry.node);
                let cost = state.cost + cost_of(street, forward, street.length);
                relax(
                    &mut table,
                    &mut open,
                    &mut seq,
                    next,
                    cost,
                    heuristic(next),
                    Some(entry.node),
                    (street_id, forward),
                );
            }
        }

        let Some((cost, goal)) = best else {
            return Err(SimError::RouteNotFound {
                from: start.street,
                to: target.street,
            });
        };

        let route = match goal {
            Goal::Direct => Route {
                nodes: Vec::new(),
                legs: vec![RouteLeg {
                    street: start.street,
                    forward: target.offset >= start.offset,
                    from_offset: start.offset,
                    to_offset: target.offset,
                }],
                cost,
                target: *target,
            },
            Goal::Via { node, forward } => {
                let mut nodes = Vec::new();
                let mut vias = Vec::new();
                let mut cursor = Some(node);
                while let Some(current) = cursor {
                    let Some(state) = table.get(current) else {
                        break;
                    };
                    nodes.push(current);
                    if let Some(via) = state.via {
                        vias.push(via);
                    }
                    cursor = state.predecessor;
                }
                nodes.reverse();
                vias.reverse();

                let mut legs = Vec::with_capacity(vias.len() + 1);
                for (i, (street_id, leg_forward)) in vias.into_iter().enumerate() {
                    let street = self.street(street_id)?;
                    let end = if leg_forward { street.length } else { 0.0 };
                    let from_offset = if i == 0 {
                        start.offset
                    } else if leg_forward {
                        0.0
                    } else {
                        street.length
                    };
                    legs.push(RouteLeg {
                        street: street_id,
                        forward: leg_forward,
                        from_offset,
                        to_offset: end,
                    });
                }
                legs.push(RouteLeg {
                    street: target.street,
                    forward,
                    from_offset: if forward { 0.0 } else { target_street.length },
                    to_offset: target.offset,
                });
                Route {
                    nodes,
                    legs,
                    cost,
                    target: *target,
                }
            }
        };
        Ok(route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::grid_map;

    fn router_fixture() -> (RoadMap, LookupTablePool) {
        let map = grid_map(5, 5, 1000.0);
        let pool = LookupTablePool::new(map.node_count());
        (map, pool)
    }

    #[test]
    fn route_cost_matches_manhattan_distance() {
        let (map, pool) = router_fixture();
        let router = Router::new(&map, &pool);
        let start = WayPoint::snap(&map, 0.0, 500.0, 0).expect("start");
        let target = WayPoint::snap(&map, 3500.0, 2000.0, 0).expect("target");
        let route = router
            .route(RoutingMode::Shortest, TravelDirection::Both, &start, &target, &[])
            .expect("route");
        assert!((route.cost - 5000.0).abs() < 1e-6);
        assert!((route.length() - 5000.0).abs() < 1e-6);
        assert_eq!(route.legs.first().map(|l| l.street), Some(start.street));
        assert_eq!(route.legs.last().map(|l| l.street), Some(target.street));
    }

    #[test]
    fn same_street_routes_directly() {
        let (map, pool) = router_fixture();
        let router = Router::new(&map, &pool);
        let start = WayPoint::snap(&map, 100.0, 0.0, 0).expect("start");
        let target = WayPoint::snap(&map, 900.0, 0.0, 0).expect("target");
        let route = router
            .route(RoutingMode::Shortest, TravelDirection::Both, &start, &target, &[])
            .expect("route");
        assert_eq!(route.legs.len(), 1);
        assert!(route.nodes.is_empty());
        assert!((route.cost - 800.0).abs() < 1e-9);
    }

    #[test]
    fn direction_restriction_forces_detour() {
        let (map, pool) = router_fixture();
        let router = Router::new(&map, &pool);
        let start = WayPoint::snap(&map, 900.0, 0.0, 0).expect("start");
        let target = WayPoint::snap(&map, 100.0, 0.0, 0).expect("target");
        let direct = router
            .route(RoutingMode::Shortest, TravelDirection::Both, &start, &target, &[])
            .expect("direct");
        assert!((direct.cost - 800.0).abs() < 1e-9);
        let detour = router
            .route(RoutingMode::Shortest, TravelDirection::Forward, &start, &target, &[])
            .expect("detour");
        assert!(detour.cost > direct.cost);
        assert!(detour.legs[0].forward);
    }

    #[test]
    fn penalties_steer_the_search() {
        let (map, pool) = router_fixture();
        let router = Router::new(&map, &pool);
        let start = WayPoint::snap(&map, 500.0, 0.0, 0).expect("start");
        let target = WayPoint::snap(&map, 2500.0, 0.0, 0).expect("target");
        let plain = router
            .route(RoutingMode::Shortest, TravelDirection::Both, &start, &target, &[])
            .expect("plain");
        assert!((plain.cost - 2000.0).abs() < 1e-9);
        let middle = plain.legs[1].street;
        let penalty = RoutePenalty {
            street: middle,
            direction: StreetDirection::Both,
            cost: 10_000.0,
        };
        let steered = router
            .route(RoutingMode::Shortest, TravelDirection::Both, &start, &target, &[penalty])
            .expect("steered");
        assert!(steered.legs.iter().all(|l| l.street != middle));
        assert!((steered.cost - 4000.0).abs() < 1e-9);
    }

    #[test]
    fn disconnected_target_is_not_found() {
        let mut builder = RoadMap::builder();
        let a = builder.add_node(0.0, 0.0);
        let b = builder.add_node(1000.0, 0.0);
        let c = builder.add_node(5000.0, 0.0);
        let d = builder.add_node(6000.0, 0.0);
        builder.add_street(a, b, 1, 10.0, false).expect("street");
        builder.add_street(c, d, 1, 10.0, false).expect("street");
        let map = builder.build();
        let pool = LookupTablePool::new(map.node_count());
        let router = Router::new(&map, &pool);
        let start = WayPoint::snap(&map, 500.0, 0.0, 0).expect("start");
        let target = WayPoint::snap(&map, 5500.0, 0.0, 0).expect("target");
        let err = router
            .route(RoutingMode::Shortest, TravelDirection::Both, &start, &target, &[])
            .unwrap_err();
        assert!(matches!(err, SimError::RouteNotFound { from: 0, to: 1 }));
    }

    #[test]
    fn oneway_streets_are_only_travelled_forward() {
        let mut builder = RoadMap::builder();
        let a = builder.add_node(0.0, 0.0);
        let b = builder.add_node(1000.0, 0.0);
        builder.add_street(a, b, 1, 10.0, true).expect("street");
        let map = builder.build();
        let pool = LookupTablePool::new(map.node_count());
        let router = Router::new(&map, &pool);
        let near = WayPoint::snap(&map, 100.0, 0.0, 0).expect("near");
        let far = WayPoint::snap(&map, 900.0, 0.0, 0).expect("far");
        assert!(router
            .route(RoutingMode::Shortest, TravelDirection::Both, &near, &far, &[])
            .is_ok());
        assert!(router
            .route(RoutingMode::Shortest, TravelDirection::Both, &far, &near, &[])
            .is_err());
    }

    #[test]
    fn fastest_mode_prefers_quick_streets() {
        let mut builder = RoadMap::builder();
        let a = builder.add_node(0.0, 0.0);
        let b = builder.add_node(1000.0, 0.0);
        let c = builder.add_node(500.0, 800.0);
        builder.add_street(a, b, 1, 5.0, false).expect("slow");
        builder.add_street(a, c, 1, 50.0, false).expect("fast");
        builder.add_street(c, b, 1, 50.0, false).expect("fast");
        let map = builder.build();
        let pool = LookupTablePool::new(map.node_count());
        let router = Router::new(&map, &pool);
        let start = WayPoint::at_offset(&map, 0, 0.0, 0).expect("start");
        let target = WayPoint::at_offset(&map, 0, 1000.0, 0).expect("target");
        let shortest = router
            .route(RoutingMode::Shortest, TravelDirection::Both, &start, &target, &[])
            .expect("shortest");
        assert_eq!(shortest.legs.len(), 1);
        let fastest = router
            .route(RoutingMode::Fastest, TravelDirection::Both, &start, &target, &[])
            .expect("fastest");
        assert!(fastest.legs.iter().any(|l| l.street == 1));
        assert!(fastest.cost < 1000.0 / 5.0);
    }

    #[test]
    fn route_points_lie_on_route() {
        let (map, pool) = router_fixture();
        let router = Router::new(&map, &pool);
        let start = WayPoint::snap(&map, 0.0, 500.0, 0).expect("start");
        let target = WayPoint::snap(&map, 3500.0, 2000.0, 0).expect("target");
        let route = router
            .route(RoutingMode::Shortest, TravelDirection::Both, &start, &target, &[])
            .expect("route");
        assert!(route.contains_point(&map, &start.position, 1e-6));
        assert!(route.contains_point(&map, &target.position, 1e-6));
        assert!(!route.contains_point(&map, &Point::new(4000.0, 4000.0), 1.0));
    }
}
