//! # Palletizer Executable Parameters
//!
//! This module provides parameters for the palletizer executable.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PalExecParams {
    /// Network endpoint for the control server
    pub control_endpoint: String,

    /// Network endpoint for the status server
    pub status_endpoint: String,

    /// Network endpoint of the left arm, if fitted
    #[serde(default)]
    pub left_arm_endpoint: Option<String>,

    /// Network endpoint of the right arm, if fitted
    #[serde(default)]
    pub right_arm_endpoint: Option<String>,

    /// Use simulated arms instead of the arm endpoints
    #[serde(default)]
    pub simulate: bool,

    /// Time a simulated arm takes to complete a move.
    ///
    /// Units: milliseconds
    #[serde(default = "default_sim_move_duration_ms")]
    pub sim_move_duration_ms: u64,

    /// Time the control server waits for a request before checking on the engine.
    ///
    /// Units: milliseconds
    #[serde(default = "default_control_recv_timeout_ms")]
    pub control_recv_timeout_ms: i32,
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn default_sim_move_duration_ms() -> u64 {
    500
}

fn default_control_recv_timeout_ms() -> i32 {
    100
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let p: PalExecParams = util::params::from_str(
            r#"
            control_endpoint = "tcp://*:5020"
            status_endpoint = "tcp://*:5021"
            right_arm_endpoint = "tcp://192.168.1.20:5030"
            "#,
        )
        .unwrap();

        assert_eq!(p.left_arm_endpoint, None);
        assert_eq!(p.right_arm_endpoint.as_deref(), Some("tcp://192.168.1.20:5030"));
        assert!(!p.simulate);
        assert_eq!(p.sim_move_duration_ms, 500);
        assert_eq!(p.control_recv_timeout_ms, 100);
    }
}
