//! Vehicle-local knowledge: peers learned from beacons and penalties learned
//! from messages.

pub mod known_vehicles;
pub mod penalties;

pub use known_vehicles::{KnownVehicle, KnownVehiclesList, KNOWN_VEHICLE_BUCKETS, KNOWN_VEHICLE_TTL_MS};
pub use penalties::{PenaltyEntry, PenaltyRegistry};
