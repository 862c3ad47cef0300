//! Core of a vehicular ad-hoc network simulator.
//!
//! Vehicles drive over a road map in fixed 40 ms ticks, exchange beacons and
//! penalty messages with their neighbours, and reroute around jams and
//! blockings. Ticks are computed in parallel by a pool of workers, each owning
//! a run of cells of the region grid.

pub mod barrier;
pub mod clock;
pub mod consumer;
pub mod context;
pub mod error;
pub mod events;
pub mod knowledge;
pub mod map;
pub mod messages;
pub mod mix_zone;
pub mod profiling;
pub mod routing;
pub mod runner;
pub mod scenario;
pub mod scheduler;
pub mod sinks;
pub mod spatial;
pub mod systems;
pub mod telemetry;
pub mod vehicle;
pub mod workers;

#[cfg(feature = "test-helpers")]
pub mod test_helpers;

pub use context::SimContext;
pub use error::{SimError, SimResult};
pub use scheduler::{SchedulerState, TickScheduler};
