//! # Autonomy Module
//!
//! This module provides the navigation core of the mower: estimating where it is, detecting when
//! something has gone wrong, following the path and deciding what to do next.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Anomaly detection - obstacles, stalls and hardware faults
pub mod detect;

/// Line tracker - keeps the mower on the segment between two waypoints
pub mod line_tracker;

/// Localisation module - provides the mower with an idea of where it is in the world
pub mod loc;

/// Operation manager - the state machine sequencing the mower's behaviour
pub mod op_mgr;

/// Defines the path generator interface and a waypoint list implementation
pub mod path;
