//! # Telemetry module
//!
//! Status events published by the engine and the status snapshot returned on request.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use crate::eqpt::arm::{Arm, Axis};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Activity of one axis on one arm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisStatus {
    pub arm: Arm,
    pub axis: Axis,
    pub activity: AxisActivity,
}

/// Snapshot of the engine's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: RunState,

    /// Index of the step being executed or held, `None` when idle.
    pub cursor: Option<usize>,

    /// Number of steps in the loaded script, zero if none is loaded.
    pub num_steps: usize,

    /// True if a replacement script is waiting for the current step to finish.
    pub script_pending: bool,

    /// Operator speed overrides currently applied to each axis.
    pub speed_overrides: BTreeMap<Axis, i64>,

    pub axes: Vec<AxisStatus>,

    /// Reason for the last fault, kept until the engine leaves the error state.
    pub last_error: Option<String>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Run state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Stopping,
    Error,
}

/// Activity of an axis as last reported by its arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisActivity {
    Idle,
    Busy,

    /// A wait on this axis was abandoned and nothing has been heard from it since.
    Unknown,
}

/// An event published on the status stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusEvent {
    /// The run state or step cursor changed.
    State {
        state: RunState,
        cursor: Option<usize>,
    },

    /// The activity of an axis changed.
    Axis {
        arm: Arm,
        axis: Axis,
        activity: AxisActivity,
    },

    /// A new script was loaded.
    ScriptLoaded { num_steps: usize },

    /// A speed override was applied.
    Speed { axis: Axis, value: i64 },

    /// Something the operator should know about, such as a clamped speed or a corrupt frame.
    Warning(String),

    /// The engine entered the error state.
    Fault(String),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "IDLE",
            RunState::Running => "RUNNING",
            RunState::Paused => "PAUSED",
            RunState::Stopping => "STOPPING",
            RunState::Error => "ERROR",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for AxisActivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AxisActivity::Idle => "idle",
            AxisActivity::Busy => "busy",
            AxisActivity::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusEvent::State {
                state,
                cursor: Some(c),
            } => write!(f, "state {} at step {}", state, c),
            StatusEvent::State {
                state,
                cursor: None,
            } => write!(f, "state {}", state),
            StatusEvent::Axis {
                arm,
                axis,
                activity,
            } => write!(f, "{} {} {}", arm, axis, activity),
            StatusEvent::ScriptLoaded { num_steps } => {
                write!(f, "script loaded ({} steps)", num_steps)
            }
            StatusEvent::Speed { axis, value } => write!(f, "speed {} = {}", axis, value),
            StatusEvent::Warning(w) => write!(f, "warning: {}", w),
            StatusEvent::Fault(e) => write!(f, "fault: {}", e),
        }
    }
}

impl StatusEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json_str: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json_str)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
