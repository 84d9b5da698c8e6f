//! # Communications interface crate.
//!
//! Provides the data types which cross the boundary of the navigation core: sensor frames polled
//! from the driver layer, drive status, operator commands and telemetry.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Sensor and drive data exchanged with the equipment driver layer
pub mod eqpt;

/// Operator commands
pub mod tc;

/// Telemetry exposed to the operator layer
pub mod tm;
