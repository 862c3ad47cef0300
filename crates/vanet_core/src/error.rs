//! Error kinds surfaced by the simulation core.
//!
//! Per-entity failures (`SnapFailed`, `RouteNotFound`, `MalformedScenarioEntity`)
//! are recovered close to where they happen and reported through `tracing`.
//! `WorkerFault` ends the running tick and returns the scheduler to idle.

use thiserror::Error;

use crate::events::EventId;
use crate::map::{Point, StreetId};

pub type SimResult<T> = Result<T, SimError>;

#[derive(Debug, Error)]
pub enum SimError {
    /// No street lies within the snapping radius of the coordinate.
    #[error("no street within {radius} units of ({x:.1}, {y:.1})")]
    SnapFailed { x: f64, y: f64, radius: f64 },

    #[error("no route from street {from} to street {to}")]
    RouteNotFound { from: StreetId, to: StreetId },

    /// The blocking event is paired with a stop event that still has to fire.
    #[error("event {0} is in use by its paired stop event")]
    EventInUse(EventId),

    #[error("event {0} not found")]
    EventNotFound(EventId),

    #[error("malformed {kind} #{index}: {reason}")]
    MalformedScenarioEntity {
        kind: &'static str,
        index: usize,
        reason: String,
    },

    #[error("worker {worker} faulted: {message}")]
    WorkerFault { worker: usize, message: String },

    #[error("map is not ready")]
    MapNotReady,

    #[error("scheduler is busy; stop it first")]
    SchedulerBusy,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SimError {
    pub fn snap_failed(point: Point, radius: f64) -> Self {
        SimError::SnapFailed {
            x: point.x,
            y: point.y,
            radius,
        }
    }

    pub fn malformed(kind: &'static str, index: usize, reason: impl Into<String>) -> Self {
        SimError::MalformedScenarioEntity {
            kind,
            index,
            reason: reason.into(),
        }
    }

    /// Whether the failure is scoped to a single entity and the simulation may continue.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SimError::WorkerFault { .. })
    }
}

/// Outcome of a failed wait on a [`crate::barrier::PhasedGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GateError {
    /// Another participant failed and will never arrive.
    #[error("gate broken")]
    Broken,
    /// The pool is being torn down.
    #[error("gate cancelled")]
    Cancelled,
}
