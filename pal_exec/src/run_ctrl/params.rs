//! Parameters structure for RunCtrl

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::eqpt::arm::{Axis, SpeedLimits};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for run control.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Params {
    /// Speed ranges for the translational and gripper axes.
    pub speed_limits: SpeedLimits,

    /// Speed overrides applied at start-up, as if set by a `SPEED` directive.
    pub initial_speeds: Vec<SpeedOverride>,
}

/// A single speed override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SpeedOverride {
    pub axis: Axis,
    pub value: i64,
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_params_from_toml() {
        let p: Params = util::params::from_str(
            r#"
            [speed_limits.translational]
            min = 10
            max = 1000

            [speed_limits.gripper]
            min = 10
            max = 364

            [[initial_speeds]]
            axis = "G"
            value = 200
            "#,
        )
        .unwrap();

        assert_eq!(p.speed_limits, SpeedLimits::default());
        assert_eq!(
            p.initial_speeds,
            vec![SpeedOverride {
                axis: Axis::G,
                value: 200
            }]
        );

        // Everything is optional
        let p: Params = util::params::from_str("").unwrap();
        assert!(p.initial_speeds.is_empty());
    }
}
