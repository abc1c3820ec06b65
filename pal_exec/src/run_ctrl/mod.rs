//! # Run control module
//!
//! Owns the run state, the step cursor and the speed table. Run control is a pure state machine:
//! it consumes [`Input`]s (operator directives, script loads and step outcomes from the
//! dispatcher) and returns the [`Action`]s the engine must perform. It never blocks and performs
//! no I/O itself.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;
mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Serialize;
use std::collections::BTreeMap;

use comms_if::{
    eqpt::arm::Axis,
    tc::Directive,
    tm::{RunState, StatusEvent},
};
use util::script::{Move, Script, Step};

pub use params::*;
pub use state::*;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Operator speed overrides, per axis.
///
/// An axis without an override runs each move at the speed given in the script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpeedTable {
    overrides: BTreeMap<Axis, i64>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Inputs consumed by run control.
#[derive(Debug, Clone)]
pub enum Input {
    Directive(Directive),

    /// Replace the loaded script.
    LoadScript(Script),

    /// The dispatcher finished the step with the given dispatch id.
    StepOutcome { id: u64, outcome: StepOutcome },
}

/// How a dispatched step ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Every move of the step was acknowledged.
    Completed,

    /// A move could not be sent, was not acknowledged in time, or a corrupt frame arrived.
    Failed(String),

    /// The wait was abandoned on request.
    Cancelled,
}

/// Actions the engine must carry out on behalf of run control.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Dispatch a step to the arms.
    Dispatch {
        id: u64,
        cursor: usize,
        step: Step,
        speeds: SpeedTable,
    },

    /// Abandon the acknowledgement wait of the given dispatch.
    Cancel { id: u64 },

    /// Return every axis to its reference position.
    Zero,

    /// Forward a speed override which has just taken effect to the arms.
    SetSpeed { axis: Axis, value: i64 },

    /// Publish a status event.
    Publish(StatusEvent),
}

/// Reasons run control rejects an input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunCtrlError {
    #[error("No script is loaded")]
    NoScriptLoaded,

    #[error("{directive} is not accepted in the {state} state")]
    InvalidTransition {
        state: RunState,
        directive: Directive,
    },

    #[error("The engine is in ERROR, only STOP or IDLE are accepted (got {0})")]
    Faulted(Directive),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SpeedTable {
    pub fn get(&self, axis: Axis) -> Option<i64> {
        self.overrides.get(&axis).copied()
    }

    pub fn set(&mut self, axis: Axis, speed: i64) {
        self.overrides.insert(axis, speed);
    }

    /// The speed a move is actually sent with.
    pub fn effective(&self, mv: &Move) -> i64 {
        self.get(mv.axis).unwrap_or(mv.speed)
    }

    pub fn overrides(&self) -> &BTreeMap<Axis, i64> {
        &self.overrides
    }
}
