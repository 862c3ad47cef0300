mod support;

use std::sync::Arc;

use vanet_core::map::StreetDirection;
use vanet_core::scenario::SimSettings;
use vanet_core::sinks::MemorySink;
use vanet_core::telemetry::Counter;

use support::sim::{route_of, TestSimBuilder, TickRunner};

#[test]
fn neighbours_learn_of_each_other_from_beacons() {
    let ctx = TestSimBuilder::new()
        .with_waiting_vehicle((100.0, 0.0), 60_000, (5000.0, 0.0), 1000.0)
        .with_waiting_vehicle((600.0, 0.0), 60_000, (5000.0, 5000.0), 1000.0)
        .build();
    let mut runner = TickRunner::new(&ctx, 2);

    runner.run_until(40);
    assert_eq!(runner.view(0).known, 1);
    assert_eq!(runner.view(1).known, 1);
    assert_eq!(ctx.telemetry().get(Counter::BeaconsSent), 2);
    assert_eq!(ctx.telemetry().get(Counter::BeaconsReceived), 2);
}

#[test]
fn silent_neighbours_are_forgotten() {
    let ctx = TestSimBuilder::new()
        .with_waiting_vehicle((100.0, 0.0), 60_000, (5000.0, 0.0), 1000.0)
        .with_waiting_vehicle((600.0, 0.0), 60_000, (5000.0, 5000.0), 1000.0)
        .build();
    let mut runner = TickRunner::new(&ctx, 2);
    runner.run_until(40);
    assert!(ctx.remove_vehicle(1).expect("remove"));

    runner.run_until(1000);
    assert_eq!(runner.view(0).known, 1);
    runner.run_until(1080);
    assert_eq!(runner.view(0).known, 0);
}

#[test]
fn vehicles_out_of_range_hear_nothing() {
    let ctx = TestSimBuilder::new()
        .with_settings(SimSettings::default().with_communication_range(300.0))
        .with_waiting_vehicle((100.0, 0.0), 60_000, (5000.0, 0.0), 1000.0)
        .with_waiting_vehicle((600.0, 0.0), 60_000, (5000.0, 5000.0), 1000.0)
        .build();
    let mut runner = TickRunner::new(&ctx, 2);
    runner.run_until(400);
    assert_eq!(runner.view(0).known, 0);
    assert_eq!(ctx.telemetry().get(Counter::BeaconsReceived), 0);
}

#[test]
fn jam_report_steers_followers_away() {
    let settings = SimSettings::default().with_jam_detection(400, 100_000.0, 50_000.0);
    let ctx = TestSimBuilder::new()
        .with_grid(4, 2, 1000.0)
        .with_regions(2, 1)
        .with_settings(settings)
        .with_vehicle((100.0, 0.0), (2900.0, 0.0), 1000.0)
        .with_waiting_vehicle((50.0, 0.0), 3000, (2800.0, 0.0), 1000.0)
        .build();
    ctx.add_start_blocking(0, 1500.0, 0.0, StreetDirection::Both, 1)
        .expect("blocking");
    assert!(route_of(&ctx, 1).legs.iter().any(|leg| leg.street == 1));
    let mut runner = TickRunner::new(&ctx, 2);

    runner.run_until(3000);

    assert!(ctx.telemetry().get(Counter::JamsReported) >= 1);
    assert!(ctx.telemetry().get(Counter::MessagesSent) >= 1);
    let follower = ctx.vehicle(1).expect("vehicle");
    let follower = follower.lock();
    let penalty = follower
        .penalties()
        .get(1, StreetDirection::Forward)
        .expect("penalty");
    assert_eq!(penalty.value, 100_000.0);
    let route = follower.route().expect("route");
    assert!(route.legs.iter().all(|leg| leg.street != 1));
    assert!(follower.stats.reroutes >= 1);
}

#[test]
fn leaving_a_mix_zone_changes_the_pseudonym() {
    let privacy = Arc::new(MemorySink::new());
    let attack = Arc::new(MemorySink::new());
    let settings = SimSettings::default()
        .with_privacy_logging(true)
        .with_attacker(Some(1))
        .with_attacked(Some(0));
    let ctx = TestSimBuilder::new()
        .with_grid(3, 1, 1000.0)
        .with_regions(1, 1)
        .with_settings(settings)
        .with_privacy_log(Arc::clone(&privacy))
        .with_attack_log(Arc::clone(&attack))
        .with_vehicle((500.0, 0.0), (1900.0, 0.0), 1000.0)
        .with_waiting_vehicle((100.0, 0.0), 60_000, (1900.0, 0.0), 1000.0)
        .build();
    ctx.add_mix_zone(1, Some(200.0), None).expect("mix zone");
    let before = runner_pseudonym(&ctx);
    let mut runner = TickRunner::new(&ctx, 1);

    runner.run_until(2000);

    let changes: Vec<String> = privacy
        .lines()
        .into_iter()
        .filter(|line| line.starts_with("Pseudonym-Change:"))
        .collect();
    assert_eq!(changes.len(), 1);
    let fields: Vec<&str> = changes[0].split(':').collect();
    assert_eq!(fields.len(), 5);
    assert_eq!(fields[2], "0");
    assert_eq!(fields[3], format!("{:x}", i64::from(before)));
    assert_ne!(runner.view(0).pseudonym, before);
    assert_eq!(ctx.telemetry().get(Counter::PseudonymChanges), 1);

    let attacks = attack.lines();
    assert!(!attacks.is_empty());
    for line in &attacks {
        let time = line.split(':').next().expect("time");
        assert!(line.starts_with(&format!("{time}:Source(Attacker):1:Attacked-Vehicle-Data:")));
        assert!(line.ends_with(":false"));
    }
}

fn runner_pseudonym(ctx: &vanet_core::SimContext) -> i32 {
    ctx.vehicle(0).expect("vehicle").view().pseudonym
}

#[test]
fn attacker_tells_its_target_apart_from_other_vehicles() {
    let attack = Arc::new(MemorySink::new());
    let settings = SimSettings::default()
        .with_mix_zones(false, 0.0)
        .with_attacker(Some(1))
        .with_attacked(Some(0));
    let ctx = TestSimBuilder::new()
        .with_grid(3, 1, 1000.0)
        .with_regions(1, 1)
        .with_settings(settings)
        .with_attack_log(Arc::clone(&attack))
        .with_vehicle((100.0, 0.0), (1900.0, 0.0), 1000.0)
        .with_waiting_vehicle((1000.0, 0.0), 60_000, (1900.0, 0.0), 1000.0)
        .with_waiting_vehicle((1500.0, 0.0), 60_000, (100.0, 0.0), 1000.0)
        .build();
    let target = format!("{:x}", i64::from(runner_pseudonym(&ctx)));
    let other = format!(
        "{:x}",
        i64::from(ctx.vehicle(2).expect("vehicle").view().pseudonym)
    );
    let mut runner = TickRunner::new(&ctx, 2);

    runner.run_until(1000);

    let lines = attack.lines();
    let attacked: Vec<&String> = lines
        .iter()
        .filter(|line| line.contains(":Source(Attacker):1:Attacked-Vehicle-Data:"))
        .collect();
    let others: Vec<&String> = lines
        .iter()
        .filter(|line| line.contains(":Source(Attacker):1:Other-Vehicle-Data:"))
        .collect();
    assert!(!attacked.is_empty());
    assert!(!others.is_empty());
    assert_eq!(attacked.len() + others.len(), lines.len());
    for line in attacked {
        assert_eq!(line.split(':').nth(4), Some(target.as_str()));
    }
    for line in others {
        assert_eq!(line.split(':').nth(4), Some(other.as_str()));
    }
}

#[test]
fn every_reception_is_logged_when_asked() {
    let attack = Arc::new(MemorySink::new());
    let settings = SimSettings::default()
        .with_mix_zones(false, 0.0)
        .with_attacker(Some(1))
        .with_attack_log_options(false, true);
    let ctx = TestSimBuilder::new()
        .with_grid(3, 1, 1000.0)
        .with_regions(1, 1)
        .with_settings(settings)
        .with_attack_log(Arc::clone(&attack))
        .with_waiting_vehicle((100.0, 0.0), 60_000, (1900.0, 0.0), 1000.0)
        .with_waiting_vehicle((1000.0, 0.0), 60_000, (1900.0, 0.0), 1000.0)
        .build();
    let mut runner = TickRunner::new(&ctx, 1);

    runner.run_until(400);

    let lines = attack.lines();
    assert!(lines
        .iter()
        .any(|line| line.contains(":Source(Attacker):1:Other-Vehicle-Data:")));
    assert!(lines
        .iter()
        .any(|line| line.contains(":Any Communication:0:Any-Vehicle Data:")));
}
