//! Turns scenario data into a running context, skipping malformed entities.

use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::context::SimContext;
use crate::error::{SimError, SimResult};
use crate::map::{NodeId, Point, RoadMap};
use crate::routing::WayPoint;
use crate::scenario::data::{EventData, ScenarioData};
use crate::spatial::Transceiver;

/// What [`load_scenario`] accepted and what it skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub streets: usize,
    pub vehicles: usize,
    pub events: usize,
    pub mix_zones: usize,
    pub transceivers: usize,
    pub skipped: usize,
    /// One line per skipped entity.
    pub problems: Vec<String>,
}

impl LoadReport {
    fn skip(&mut self, err: &SimError) {
        warn!(error = %err, "scenario entity skipped");
        self.skipped += 1;
        self.problems.push(err.to_string());
    }
}

pub fn from_json(json: &str) -> SimResult<ScenarioData> {
    Ok(serde_json::from_str(json)?)
}

pub fn load_file(path: impl AsRef<Path>) -> SimResult<ScenarioData> {
    from_json(&fs::read_to_string(path)?)
}

/// Builds a ready-to-run context from scenario data.
///
/// Fails only when no usable node is left; every other problem skips the
/// entity concerned.
pub fn load_scenario(data: &ScenarioData) -> SimResult<(SimContext, LoadReport)> {
    let mut report = LoadReport::default();

    // Node indices shift when a node is dropped.
    let mut builder = RoadMap::builder();
    let mut node_ids: Vec<Option<NodeId>> = Vec::with_capacity(data.map.nodes.len());
    for (index, node) in data.map.nodes.iter().enumerate() {
        if !(node.x.is_finite() && node.y.is_finite()) {
            report.skip(&SimError::malformed("node", index, "coordinates must be finite"));
            node_ids.push(None);
            continue;
        }
        let id = builder.add_node(node.x, node.y);
        if node.traffic_light {
            builder.set_traffic_light(id);
        }
        node_ids.push(Some(id));
    }
    if node_ids.iter().all(Option::is_none) {
        return Err(SimError::malformed("map", 0, "no usable nodes"));
    }
    let resolve = |node: NodeId| node_ids.get(node as usize).copied().flatten();

    for (index, street) in data.map.streets.iter().enumerate() {
        let (Some(start), Some(end)) = (resolve(street.start), resolve(street.end)) else {
            report.skip(&SimError::malformed("street", index, "unknown node"));
            continue;
        };
        match builder.add_named_street(
            start,
            end,
            street.lanes,
            street.speed,
            street.oneway,
            street.name.clone(),
        ) {
            Ok(_) => report.streets += 1,
            Err(err) => report.skip(&err),
        }
    }

    let ctx = SimContext::with_grid(builder.build(), data.grid, data.settings.clone());

    let mut next_transceiver = 0u32;
    let mut transceiver_at = |x: f64, y: f64, range: f64, index: usize| -> SimResult<Transceiver> {
        if !(x.is_finite() && y.is_finite() && range.is_finite() && range > 0.0) {
            return Err(SimError::malformed(
                "transceiver",
                index,
                "needs a finite position and a positive range",
            ));
        }
        let id = next_transceiver;
        next_transceiver += 1;
        Ok(Transceiver {
            id,
            position: Point::new(x, y),
            range,
            mix_zone: None,
        })
    };

    for (index, t) in data.transceivers.iter().enumerate() {
        match transceiver_at(t.x, t.y, t.range, index) {
            Ok(transceiver) => {
                ctx.add_transceiver(transceiver);
                report.transceivers += 1;
            }
            Err(err) => report.skip(&err),
        }
    }

    for (index, zone) in data.mix_zones.iter().enumerate() {
        let Some(node) = resolve(zone.node) else {
            report.skip(&SimError::malformed("mix zone", index, "unknown node"));
            continue;
        };
        let transceiver = match zone.transceiver {
            Some(t) => match transceiver_at(t.x, t.y, t.range, index) {
                Ok(transceiver) => Some(transceiver),
                Err(err) => {
                    report.skip(&err);
                    continue;
                }
            },
            None => None,
        };
        let has_transceiver = transceiver.is_some();
        match ctx.add_mix_zone(node, zone.radius, transceiver) {
            Ok(()) => {
                report.mix_zones += 1;
                if has_transceiver {
                    report.transceivers += 1;
                }
            }
            Err(err) => report.skip(&err),
        }
    }

    for (index, vehicle) in data.vehicles.iter().enumerate() {
        let points: Vec<(f64, f64, u64)> = vehicle
            .waypoints
            .iter()
            .map(|w| (w.x, w.y, w.wait_ms))
            .collect();
        match ctx.add_vehicle_at(&points, vehicle.max_speed) {
            Ok(_) => report.vehicles += 1,
            Err(err) => {
                let err = match err {
                    SimError::MalformedScenarioEntity { kind, reason, .. } => {
                        SimError::MalformedScenarioEntity {
                            kind,
                            index,
                            reason,
                        }
                    }
                    other => other,
                };
                report.skip(&err);
            }
        }
    }

    // Stops pair with starts scheduled before them.
    let mut events: Vec<&EventData> = data.events.iter().collect();
    events.sort_by_key(|e| e.time());
    for event in events {
        let added = match *event {
            EventData::StartBlocking {
                time,
                x,
                y,
                direction,
                lanes,
            } => ctx.add_start_blocking(time, x, y, direction, lanes),
            EventData::StopBlocking { time, x, y } => ctx.add_stop_blocking(time, x, y),
        };
        match added {
            Ok(_) => report.events += 1,
            Err(err) => report.skip(&err),
        }
    }

    if ctx.settings().mix_zones_enabled && !ctx.mix_zones().is_empty() {
        ctx.precompute_mix_zones();
    }

    info!(
        streets = report.streets,
        vehicles = report.vehicles,
        events = report.events,
        mix_zones = report.mix_zones,
        skipped = report.skipped,
        "scenario loaded"
    );
    Ok((ctx, report))
}

/// Adds `count` vehicles on random street positions, each with one to three
/// random targets. Returns how many were added.
pub fn generate_random_vehicles(ctx: &SimContext, count: usize, seed: u64) -> SimResult<usize> {
    let map = ctx.map();
    let streets = map.streets().len();
    if streets == 0 {
        return Err(SimError::malformed("map", 0, "no streets to place vehicles on"));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let top_speed = map.max_speed();
    let random_point = |rng: &mut StdRng| -> SimResult<WayPoint> {
        let street = rng.gen_range(0..streets) as u32;
        let length = map.street(street).map_or(0.0, |s| s.length);
        let offset = if length > 0.0 { rng.gen_range(0.0..=length) } else { 0.0 };
        let wait_ms = rng.gen_range(0..=4u64) * 1000;
        WayPoint::at_offset(map, street, offset, wait_ms)
    };

    let mut added = 0;
    for _ in 0..count {
        let targets = rng.gen_range(1..=3);
        let mut waypoints = Vec::with_capacity(targets + 1);
        for _ in 0..=targets {
            waypoints.push(random_point(&mut rng)?);
        }
        waypoints[0].wait_ms = 0;
        let max_speed = top_speed * rng.gen_range(0.6..=1.0);
        match ctx.add_vehicle(&waypoints, max_speed) {
            Ok(_) => added += 1,
            Err(err) => warn!(error = %err, "random vehicle skipped"),
        }
    }
    info!(requested = count, added, seed, "random vehicles generated");
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::data::{MapData, NodeData, StreetData, VehicleData, WayPointData};

    fn square_scenario() -> ScenarioData {
        let node = |x, y| NodeData {
            x,
            y,
            traffic_light: false,
        };
        let street = |start, end| StreetData {
            start,
            end,
            lanes: 1,
            speed: 1000.0,
            oneway: false,
            name: String::new(),
        };
        ScenarioData {
            map: MapData {
                nodes: vec![
                    node(0.0, 0.0),
                    node(2000.0, 0.0),
                    node(2000.0, 2000.0),
                    node(0.0, 2000.0),
                ],
                streets: vec![street(0, 1), street(1, 2), street(2, 3), street(3, 0)],
            },
            ..ScenarioData::default()
        }
    }

    #[test]
    fn loads_and_counts_entities() {
        let mut data = square_scenario();
        data.vehicles.push(VehicleData {
            waypoints: vec![
                WayPointData {
                    x: 10.0,
                    y: 0.0,
                    wait_ms: 0,
                },
                WayPointData {
                    x: 2000.0,
                    y: 1500.0,
                    wait_ms: 0,
                },
            ],
            max_speed: 800.0,
        });
        let (ctx, report) = load_scenario(&data).expect("load");
        assert_eq!(report.streets, 4);
        assert_eq!(report.vehicles, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(ctx.vehicle_count(), 1);
    }

    #[test]
    fn malformed_entities_are_skipped() {
        let mut data = square_scenario();
        data.map.nodes.push(NodeData {
            x: f64::NAN,
            y: 0.0,
            traffic_light: false,
        });
        data.map.streets.push(StreetData {
            start: 0,
            end: 4,
            lanes: 1,
            speed: 1000.0,
            oneway: false,
            name: "to nowhere".to_string(),
        });
        // One way point only.
        data.vehicles.push(VehicleData {
            waypoints: vec![WayPointData {
                x: 0.0,
                y: 0.0,
                wait_ms: 0,
            }],
            max_speed: 800.0,
        });
        let (ctx, report) = load_scenario(&data).expect("load");
        assert_eq!(report.streets, 4);
        assert_eq!(report.vehicles, 0);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.problems.len(), 3);
        assert_eq!(ctx.map().node_count(), 4);
    }

    #[test]
    fn empty_map_is_an_error() {
        assert!(load_scenario(&ScenarioData::default()).is_err());
    }

    #[test]
    fn parses_json_with_defaults() {
        let json = r#"{
            "map": {
                "nodes": [{"x": 0, "y": 0}, {"x": 1000, "y": 0}],
                "streets": [{"start": 0, "end": 1, "speed": 900}]
            },
            "events": [
                {"type": "stop_blocking", "time": 500, "x": 500, "y": 0},
                {"type": "start_blocking", "time": 100, "x": 500, "y": 0, "lanes": 2}
            ],
            "settings": {"beacon_interval_ms": 400}
        }"#;
        let data = from_json(json).expect("json");
        assert_eq!(data.map.streets[0].lanes, 1);
        assert_eq!(data.settings.beacon_interval_ms, 400);
        assert_eq!(data.settings.communication_interval_ms, 160);
        let (ctx, report) = load_scenario(&data).expect("load");
        // Sorted by time, so the stop finds its start.
        assert_eq!(report.events, 2);
        assert_eq!(ctx.events().len(), 2);
    }

    #[test]
    fn random_vehicles_are_reproducible() {
        let (first, _) = load_scenario(&square_scenario()).expect("load");
        let (second, _) = load_scenario(&square_scenario()).expect("load");
        assert_eq!(generate_random_vehicles(&first, 5, 7).expect("generate"), 5);
        assert_eq!(generate_random_vehicles(&second, 5, 7).expect("generate"), 5);
        let a: Vec<_> = first.snapshot().vehicles.iter().map(|v| v.position).collect();
        let b: Vec<_> = second.snapshot().vehicles.iter().map(|v| v.position).collect();
        assert_eq!(a, b);
    }
}
