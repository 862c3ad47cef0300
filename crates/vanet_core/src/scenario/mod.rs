//! Scenario input: resolved map, vehicles, mix zones, transceivers and events,
//! plus the settings that drive a run.
//!
//! Loading is lenient per entity. A malformed vehicle, street or event is
//! skipped with a warning and counted in the [`LoadReport`]; the rest of the
//! scenario still loads.

mod build;
mod data;
mod params;

pub use build::{from_json, generate_random_vehicles, load_file, load_scenario, LoadReport};
pub use data::{
    EventData, MapData, MixZoneData, NodeData, ScenarioData, StreetData, TransceiverData,
    VehicleData, WayPointData,
};
pub use params::{
    GridConfig, SchedulerConfig, SimSettings, JAM_MESSAGE_VALIDITY_MS, RENDER_TIMEOUT_MS,
};
