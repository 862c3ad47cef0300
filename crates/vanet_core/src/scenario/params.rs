//! Simulation settings and scheduler configuration.

use serde::{Deserialize, Serialize};

use crate::clock::TICK_MS;
use crate::routing::RoutingMode;
use crate::vehicle::VehicleId;

/// Validity of a jam penalty message and of the penalty it carries (ms).
pub const JAM_MESSAGE_VALIDITY_MS: u64 = 15_000;

/// Bounded wait for the render consumer to acknowledge a tick.
pub const RENDER_TIMEOUT_MS: u64 = 3_000;

/// Global simulation switches and intervals, shared by every vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimSettings {
    /// Master switch for beacons and messages.
    pub communication_enabled: bool,
    pub beacons_enabled: bool,
    /// How often carried messages are forwarded and failed routes retried (ms).
    pub communication_interval_ms: u64,
    pub beacon_interval_ms: u64,
    /// Maximum radio range in map units.
    pub communication_range: f64,
    pub mix_zones_enabled: bool,
    /// Radius used for mix zones that do not specify their own.
    pub mix_zone_radius: f64,
    /// Beacons sent inside a mix zone are encrypted and stay inside it.
    pub encrypted_beacons_in_mix: bool,
    pub routing_mode: RoutingMode,
    /// Standing still on a route for this long counts as a jam (ms).
    pub jam_threshold_ms: u64,
    /// Extra routing cost announced for a jammed street.
    pub jam_penalty: f64,
    /// Radius of the area a jam message is addressed to.
    pub jam_message_radius: f64,
    /// Rebroadcast messages to every neighbour instead of forwarding along a line.
    pub message_flooding: bool,
    /// Write pseudonym changes to the privacy log.
    pub privacy_logging: bool,
    /// Vehicle whose received beacons are written to the attack log.
    pub attacker: Option<VehicleId>,
    /// Vehicle the attacker follows; its beacons are logged as attacked data.
    pub attacked: Option<VehicleId>,
    /// Also log encrypted beacons the attacker overhears.
    pub attack_log_encrypted: bool,
    /// Log every other beacon reception as well, while an attacker is set.
    pub attack_log_all: bool,
    /// Seed for per-vehicle randomness (pseudonyms).
    pub seed: u64,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            communication_enabled: true,
            beacons_enabled: true,
            communication_interval_ms: 160,
            beacon_interval_ms: 240,
            communication_range: 10_000.0,
            mix_zones_enabled: true,
            mix_zone_radius: 10_000.0,
            encrypted_beacons_in_mix: false,
            routing_mode: RoutingMode::Shortest,
            jam_threshold_ms: 5_000,
            jam_penalty: 100_000.0,
            jam_message_radius: 50_000.0,
            message_flooding: false,
            privacy_logging: false,
            attacker: None,
            attacked: None,
            attack_log_encrypted: false,
            attack_log_all: false,
            seed: 0,
        }
    }
}

impl SimSettings {
    pub fn with_communication(mut self, enabled: bool) -> Self {
        self.communication_enabled = enabled;
        self
    }

    pub fn with_beacons(mut self, enabled: bool) -> Self {
        self.beacons_enabled = enabled;
        self
    }

    pub fn with_communication_interval_ms(mut self, interval_ms: u64) -> Self {
        self.communication_interval_ms = interval_ms.max(TICK_MS);
        self
    }

    pub fn with_beacon_interval_ms(mut self, interval_ms: u64) -> Self {
        self.beacon_interval_ms = interval_ms.max(TICK_MS);
        self
    }

    pub fn with_communication_range(mut self, range: f64) -> Self {
        self.communication_range = range;
        self
    }

    pub fn with_mix_zones(mut self, enabled: bool, radius: f64) -> Self {
        self.mix_zones_enabled = enabled;
        self.mix_zone_radius = radius;
        self
    }

    pub fn with_encrypted_beacons_in_mix(mut self, enabled: bool) -> Self {
        self.encrypted_beacons_in_mix = enabled;
        self
    }

    pub fn with_routing_mode(mut self, mode: RoutingMode) -> Self {
        self.routing_mode = mode;
        self
    }

    pub fn with_jam_detection(mut self, threshold_ms: u64, penalty: f64, radius: f64) -> Self {
        self.jam_threshold_ms = threshold_ms;
        self.jam_penalty = penalty;
        self.jam_message_radius = radius;
        self
    }

    pub fn with_message_flooding(mut self, enabled: bool) -> Self {
        self.message_flooding = enabled;
        self
    }

    pub fn with_privacy_logging(mut self, enabled: bool) -> Self {
        self.privacy_logging = enabled;
        self
    }

    pub fn with_attacker(mut self, attacker: Option<VehicleId>) -> Self {
        self.attacker = attacker;
        self
    }

    pub fn with_attacked(mut self, attacked: Option<VehicleId>) -> Self {
        self.attacked = attacked;
        self
    }

    pub fn with_attack_log_options(mut self, encrypted: bool, all: bool) -> Self {
        self.attack_log_encrypted = encrypted;
        self.attack_log_all = all;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Beacons are only sent when communication as a whole is on.
    pub fn beacons_active(&self) -> bool {
        self.communication_enabled && self.beacons_enabled
    }
}

/// Region layout. `None` fields are derived from the map extent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub columns: Option<usize>,
    pub rows: Option<usize>,
    /// Edge length used when the counts are derived.
    pub region_size: Option<f64>,
}

/// Tick scheduler configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker threads; defaults to twice the available parallelism.
    pub workers: Option<usize>,
    /// Real-time pacing between ticks while running (ms).
    pub tick_interval_ms: u64,
    pub render_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: None,
            tick_interval_ms: TICK_MS,
            render_timeout_ms: RENDER_TIMEOUT_MS,
        }
    }
}

impl SchedulerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers.max(1));
        self
    }

    pub fn with_tick_interval_ms(mut self, interval_ms: u64) -> Self {
        self.tick_interval_ms = interval_ms;
        self
    }

    /// Configured worker count, or twice the detected parallelism (at least one).
    pub fn worker_count(&self) -> usize {
        match self.workers {
            Some(workers) => workers.max(1),
            None => std::thread::available_parallelism()
                .map(|n| n.get() * 2)
                .unwrap_or(1)
                .max(1),
        }
    }
}
