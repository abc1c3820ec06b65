//! Parameters structure for the arm dispatcher

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::eqpt::arm::{Arm, Axis};
use serde::Deserialize;
use std::time::Duration;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the arm dispatcher.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Params {
    /// What counts as completion of a move.
    pub ack_mode: AckMode,

    /// Time allowed for every move of a step to complete.
    ///
    /// Units: milliseconds
    pub ack_timeout_ms: u64,

    /// Period at which the links and the cancel flag are polled.
    ///
    /// Units: milliseconds
    pub poll_interval_ms: u64,

    /// Which arm or arms drive each axis.
    pub axis_mapping: AxisMapping,
}

/// Routing of each axis to the arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AxisMapping {
    pub x: ArmMapping,
    pub y: ArmMapping,
    pub z: ArmMapping,
    pub t: ArmMapping,
    pub g: ArmMapping,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Completion signal awaited for each move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// An `A` frame naming the axis and move index.
    Frame,

    /// An `S` frame reporting busy followed by one reporting ready.
    StatusEdge,
}

/// The arm(s) an axis is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmMapping {
    Left,
    Right,
    Both,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            ack_mode: AckMode::Frame,
            ack_timeout_ms: 20_000,
            poll_interval_ms: 10,
            axis_mapping: AxisMapping::default(),
        }
    }
}

impl Params {
    pub fn ack_timeout(&self) -> Duration {
        util::time::millis(self.ack_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        util::time::millis(self.poll_interval_ms.max(1))
    }
}

impl Default for AxisMapping {
    fn default() -> Self {
        Self::all(ArmMapping::Left)
    }
}

impl AxisMapping {
    /// Route every axis the same way.
    pub fn all(mapping: ArmMapping) -> Self {
        Self {
            x: mapping,
            y: mapping,
            z: mapping,
            t: mapping,
            g: mapping,
        }
    }

    pub fn get(&self, axis: Axis) -> ArmMapping {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
            Axis::T => self.t,
            Axis::G => self.g,
        }
    }

    /// The arms the axis is routed to.
    pub fn arms(&self, axis: Axis) -> &'static [Arm] {
        self.get(axis).arms()
    }

    /// The axes driven by the given arm.
    pub fn axes_of(&self, arm: Arm) -> Vec<Axis> {
        Axis::ALL
            .iter()
            .copied()
            .filter(|a| self.arms(*a).contains(&arm))
            .collect()
    }
}

impl Default for ArmMapping {
    fn default() -> Self {
        ArmMapping::Left
    }
}

impl ArmMapping {
    pub fn arms(self) -> &'static [Arm] {
        match self {
            ArmMapping::Left => &[Arm::Left],
            ArmMapping::Right => &[Arm::Right],
            ArmMapping::Both => &Arm::ALL,
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
