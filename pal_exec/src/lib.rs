//! # Palletizer library.
//!
//! This library allows other crates in the workspace, and the integration tests, to access items
//! defined inside the palletizer executable crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Run control - run state machine, step cursor and speed table
pub mod run_ctrl;

/// Arm dispatcher - sends steps to the arms and waits for their completion
pub mod dispatcher;

/// Engine - owns run control and the dispatcher, serialises every request
pub mod engine;

/// Arm client - zmq link to a physical arm
pub mod arm_client;

/// Simulated arm - in-process arm link for dry runs
pub mod sim_arm;

/// Status server - publishes status events
pub mod status_server;

/// Control server - receives control requests from the operator
pub mod control_server;

/// Request processor - applies control requests to the engine
pub mod request_processor;

/// Executable parameters
pub mod params;
