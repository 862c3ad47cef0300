#![allow(dead_code)]

use pathfinding::prelude::dijkstra;
use vanet_core::map::{NodeId, RoadMap};

/// Fixed-point scale for street lengths; `dijkstra` needs an integer cost.
pub const COST_SCALE: f64 = 1000.0;

/// Shortest node-to-node distance, computed independently of the router.
pub fn shortest_distance(map: &RoadMap, from: NodeId, to: NodeId) -> Option<f64> {
    let successors = |node: &NodeId| -> Vec<(NodeId, u64)> {
        map.streets_at(*node)
            .iter()
            .filter_map(|id| map.street(*id))
            .filter(|street| street.allows(street.start == *node))
            .map(|street| {
                (
                    street.other_end(*node),
                    (street.length * COST_SCALE).round() as u64,
                )
            })
            .collect()
    };
    dijkstra(&from, successors, |node| *node == to).map(|(_, cost)| cost as f64 / COST_SCALE)
}
