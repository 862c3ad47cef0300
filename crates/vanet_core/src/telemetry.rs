//! Telemetry: run-wide counters and per-tick snapshots for consumers.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::vehicle::VehicleView;

/// Counters kept for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Ticks,
    BeaconsSent,
    BeaconsReceived,
    MessagesSent,
    MessagesDelivered,
    Reroutes,
    RouteFailures,
    JamsReported,
    PseudonymChanges,
    Arrivals,
    EventsFired,
}

const COUNTERS: usize = 11;

impl Counter {
    fn index(self) -> usize {
        self as usize
    }
}

/// Lock-free counters, updated from every worker.
#[derive(Debug, Default)]
pub struct Telemetry {
    counters: [AtomicU64; COUNTERS],
}

impl Telemetry {
    pub fn add(&self, counter: Counter, n: u64) {
        if n > 0 {
            self.counters[counter.index()].fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn incr(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        for counter in &self.counters {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn summary(&self) -> TelemetrySummary {
        TelemetrySummary {
            ticks: self.get(Counter::Ticks),
            beacons_sent: self.get(Counter::BeaconsSent),
            beacons_received: self.get(Counter::BeaconsReceived),
            messages_sent: self.get(Counter::MessagesSent),
            messages_delivered: self.get(Counter::MessagesDelivered),
            reroutes: self.get(Counter::Reroutes),
            route_failures: self.get(Counter::RouteFailures),
            jams_reported: self.get(Counter::JamsReported),
            pseudonym_changes: self.get(Counter::PseudonymChanges),
            arrivals: self.get(Counter::Arrivals),
            events_fired: self.get(Counter::EventsFired),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TelemetrySummary {
    pub ticks: u64,
    pub beacons_sent: u64,
    pub beacons_received: u64,
    pub messages_sent: u64,
    pub messages_delivered: u64,
    pub reroutes: u64,
    pub route_failures: u64,
    pub jams_reported: u64,
    pub pseudonym_changes: u64,
    pub arrivals: u64,
    pub events_fired: u64,
}

/// State of the simulation at the end of one tick, as handed to consumers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickSnapshot {
    pub time: u64,
    /// Ordered by vehicle id.
    pub vehicles: Vec<VehicleView>,
    pub telemetry: TelemetrySummary,
}

impl TickSnapshot {
    pub fn active_vehicles(&self) -> usize {
        self.vehicles.iter().filter(|v| v.active).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_reset() {
        let telemetry = Telemetry::default();
        telemetry.incr(Counter::BeaconsSent);
        telemetry.add(Counter::BeaconsSent, 4);
        telemetry.add(Counter::Reroutes, 0);
        telemetry.incr(Counter::EventsFired);
        let summary = telemetry.summary();
        assert_eq!(summary.beacons_sent, 5);
        assert_eq!(summary.reroutes, 0);
        assert_eq!(summary.events_fired, 1);
        telemetry.reset();
        assert_eq!(telemetry.summary(), TelemetrySummary::default());
    }
}
