//! Test helpers for common test setup and utilities.
//!
//! Grid fixtures shared by unit tests, integration tests, benches and the
//! headless runner.

use crate::context::SimContext;
use crate::map::{NodeId, Point, RoadMap};
use crate::routing::WayPoint;
use crate::scenario::{GridConfig, SimSettings};
use crate::vehicle::{Vehicle, VehicleHandle, VehicleId};

/// Speed limit of every street in [`grid_map`], in map units per second.
pub const GRID_STREET_SPEED: f64 = 1400.0;

/// `columns × rows` junctions `spacing` apart, starting at the origin, joined
/// by two-way single-lane streets.
///
/// Nodes are numbered row by row. All horizontal streets come first (west to
/// east, row by row), then all vertical ones (south to north, column by
/// column).
///
/// # Panics
///
/// Panics if `spacing` is not positive (streets would have zero length).
pub fn grid_map(columns: usize, rows: usize, spacing: f64) -> RoadMap {
    let mut builder = RoadMap::builder();
    for row in 0..rows {
        for col in 0..columns {
            builder.add_node(col as f64 * spacing, row as f64 * spacing);
        }
    }
    let node = |col: usize, row: usize| (row * columns + col) as NodeId;
    for row in 0..rows {
        for col in 0..columns.saturating_sub(1) {
            builder
                .add_street(node(col, row), node(col + 1, row), 1, GRID_STREET_SPEED, false)
                .expect("grid street");
        }
    }
    for col in 0..columns {
        for row in 0..rows.saturating_sub(1) {
            builder
                .add_street(node(col, row), node(col, row + 1), 1, GRID_STREET_SPEED, false)
                .expect("grid street");
        }
    }
    builder.build()
}

/// Context over [`grid_map`] with a `grid_columns × grid_rows` region grid.
pub fn grid_context(
    columns: usize,
    rows: usize,
    spacing: f64,
    grid_columns: usize,
    grid_rows: usize,
) -> SimContext {
    grid_context_with(columns, rows, spacing, grid_columns, grid_rows, SimSettings::default())
}

pub fn grid_context_with(
    columns: usize,
    rows: usize,
    spacing: f64,
    grid_columns: usize,
    grid_rows: usize,
    settings: SimSettings,
) -> SimContext {
    SimContext::with_grid(
        grid_map(columns, rows, spacing),
        GridConfig {
            columns: Some(grid_columns),
            rows: Some(grid_rows),
            region_size: None,
        },
        settings,
    )
}

/// Parked vehicle at the origin, without targets or route.
pub fn test_vehicle_handle(id: VehicleId) -> VehicleHandle {
    let start = WayPoint {
        position: Point::new(0.0, 0.0),
        street: 0,
        offset: 0.0,
        wait_ms: 0,
    };
    VehicleHandle::new(Vehicle::new(id, start, Vec::new(), 1000.0, 0))
}
