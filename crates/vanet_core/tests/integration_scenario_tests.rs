mod support;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use vanet_core::scenario::{load_file, load_scenario, ScenarioData};
use vanet_core::sinks::{MemorySink, NullSink};
use vanet_core::telemetry::Counter;

use support::sim::TickRunner;

const SCENARIO: &str = r#"{
    "map": {
        "nodes": [
            {"x": 0, "y": 0}, {"x": 1000, "y": 0}, {"x": 2000, "y": 0},
            {"x": 0, "y": 1000}, {"x": 1000, "y": 1000, "traffic_light": true}, {"x": 2000, "y": 1000},
            {"x": 0, "y": 2000}, {"x": 1000, "y": 2000}, {"x": 2000, "y": 2000}
        ],
        "streets": [
            {"start": 0, "end": 1, "speed": 1400},
            {"start": 1, "end": 2, "speed": 1400},
            {"start": 3, "end": 4, "speed": 1400},
            {"start": 4, "end": 5, "speed": 1400},
            {"start": 6, "end": 7, "speed": 1400},
            {"start": 7, "end": 8, "speed": 1400},
            {"start": 0, "end": 3, "speed": 1400},
            {"start": 3, "end": 6, "speed": 1400},
            {"start": 1, "end": 4, "speed": 1400},
            {"start": 4, "end": 7, "speed": 1400},
            {"start": 2, "end": 5, "speed": 1400},
            {"start": 5, "end": 8, "speed": 1400, "name": "east"},
            {"start": 8, "end": 42, "speed": 1400}
        ]
    },
    "vehicles": [
        {"waypoints": [{"x": 0, "y": 0}, {"x": 2000, "y": 2000, "wait_ms": 1000}, {"x": 0, "y": 2000}], "max_speed": 1000},
        {"waypoints": [{"x": 1000, "y": 0}], "max_speed": 1000},
        {"waypoints": [{"x": 1000, "y": 0}, {"x": 1000, "y": 2000}], "max_speed": 0}
    ],
    "mix_zones": [
        {"node": 4, "radius": 200, "transceiver": {"x": 1000, "y": 1000, "range": 300}},
        {"node": 99}
    ],
    "transceivers": [
        {"x": 2000, "y": 2000, "range": 500},
        {"x": 0, "y": 0, "range": -1}
    ],
    "events": [
        {"type": "stop_blocking", "time": 500, "x": 0, "y": 1500},
        {"type": "start_blocking", "time": 100, "x": 0, "y": 1500, "direction": "both"}
    ],
    "settings": {"beacon_interval_ms": 400, "privacy_logging": true},
    "grid": {"columns": 2, "rows": 2}
}"#;

fn temp_scenario_path(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock should be after epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("{prefix}_{nanos}.json"))
}

fn load_fixture() -> ScenarioData {
    let path = temp_scenario_path("vanet_scenario");
    std::fs::write(&path, SCENARIO).expect("write scenario");
    let data = load_file(&path).expect("load file");
    std::fs::remove_file(&path).expect("remove scenario");
    data
}

#[test]
fn loads_a_scenario_file_and_skips_malformed_entities() {
    let data = load_fixture();
    assert_eq!(data.settings.beacon_interval_ms, 400);
    assert_eq!(data.grid.columns, Some(2));

    let (ctx, report) = load_scenario(&data).expect("load");
    assert_eq!(report.streets, 12);
    assert_eq!(report.vehicles, 1);
    assert_eq!(report.mix_zones, 1);
    assert_eq!(report.transceivers, 2);
    assert_eq!(report.events, 2);
    // Street to a missing node, two vehicles, one mix zone, one transceiver.
    assert_eq!(report.skipped, 5);
    assert_eq!(report.problems.len(), 5);

    assert_eq!(ctx.map().node_count(), 9);
    assert!(ctx.map().node(4).expect("node").traffic_light);
    assert_eq!(ctx.map().street(11).expect("street").name, "east");
    assert_eq!(ctx.grid().len(), 4);
    assert_eq!(ctx.mix_zones().len(), 1);
    assert_eq!(ctx.transceivers().len(), 2);
    assert!(ctx
        .transceivers()
        .iter()
        .any(|t| t.mix_zone == Some(4)));
}

#[test]
fn mix_zone_crossings_are_logged_in_street_order() {
    let (ctx, _) = load_scenario(&load_fixture()).expect("load");
    let privacy = Arc::new(MemorySink::new());
    let ctx = ctx.with_logs(privacy.clone(), Arc::new(NullSink));

    let crossings = ctx.precompute_mix_zones();
    assert_eq!(crossings.len(), 1);
    assert_eq!(crossings[0].points.len(), 4);
    assert_eq!(
        privacy.lines(),
        vec![
            "Mix-Zone(x):Node ID:4:Radius:200:800:1200:1000:1000".to_string(),
            "Mix-Zone(y):Node ID:4:Radius:200:1000:1000:800:1200".to_string(),
        ]
    );
}

#[test]
fn loaded_scenario_runs_its_events() {
    let (ctx, _) = load_scenario(&load_fixture()).expect("load");
    let ctx = Arc::new(ctx);
    let mut runner = TickRunner::new(&ctx, 2);

    runner.run_until(200);
    assert_eq!(ctx.events().active_blockings().len(), 1);
    runner.run_until(600);
    assert!(ctx.events().active_blockings().is_empty());
    assert_eq!(ctx.telemetry().get(Counter::EventsFired), 2);

    let vehicle = runner.view(0);
    assert!(vehicle.active);
    assert!(vehicle.position.x > 0.0 || vehicle.position.y > 0.0);
}
