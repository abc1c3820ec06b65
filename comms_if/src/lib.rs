//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the palletizer software.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Operator directives and control requests
pub mod tc;

/// Status events and reports
pub mod tm;

/// Axis model and the frame codec used on the arm links
pub mod eqpt;

/// Network module
pub mod net;
