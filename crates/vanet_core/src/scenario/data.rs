//! Serde model of a scenario file.

use serde::{Deserialize, Serialize};

use crate::map::{NodeId, StreetDirection};
use crate::scenario::params::{GridConfig, SimSettings};

fn one_lane() -> u8 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioData {
    pub map: MapData,
    pub vehicles: Vec<VehicleData>,
    pub mix_zones: Vec<MixZoneData>,
    pub transceivers: Vec<TransceiverData>,
    pub events: Vec<EventData>,
    pub settings: SimSettings,
    pub grid: GridConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapData {
    pub nodes: Vec<NodeData>,
    pub streets: Vec<StreetData>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub traffic_light: bool,
}

/// Street between two nodes, referenced by their index in [`MapData::nodes`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreetData {
    pub start: NodeId,
    pub end: NodeId,
    #[serde(default = "one_lane")]
    pub lanes: u8,
    /// Speed limit in map units per second.
    pub speed: f64,
    #[serde(default)]
    pub oneway: bool,
    #[serde(default)]
    pub name: String,
}

/// Vehicle starting at the first way point and visiting the others in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleData {
    pub waypoints: Vec<WayPointData>,
    pub max_speed: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WayPointData {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub wait_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixZoneData {
    pub node: NodeId,
    /// Falls back to the configured mix-zone radius.
    #[serde(default)]
    pub radius: Option<f64>,
    #[serde(default)]
    pub transceiver: Option<TransceiverData>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransceiverData {
    pub x: f64,
    pub y: f64,
    pub range: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventData {
    StartBlocking {
        time: u64,
        x: f64,
        y: f64,
        #[serde(default)]
        direction: StreetDirection,
        #[serde(default = "one_lane")]
        lanes: u8,
    },
    StopBlocking {
        time: u64,
        x: f64,
        y: f64,
    },
}

impl EventData {
    pub fn time(&self) -> u64 {
        match self {
            EventData::StartBlocking { time, .. } | EventData::StopBlocking { time, .. } => *time,
        }
    }
}
