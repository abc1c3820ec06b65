//! # Equipment Interface
//!
//! This module defines the interface structures exchanged with the palletizer arms.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod arm;
