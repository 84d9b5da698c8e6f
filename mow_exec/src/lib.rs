//! # Mower library.
//!
//! This library holds the navigation core of the mower, so that it can be driven by the
//! executable, the benchmarks and tests alike.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Autonomy - localisation, anomaly detection, line tracking and the operation state machine
pub mod auto;

/// Robot context and control cycle
pub mod context;

/// Drive interface to the traction and mow motors
pub mod drive;

/// Executable parameters
pub mod params;

/// Persistence of the operation state between runs
pub mod persist;

/// Kinematic simulator standing in for the driver layer
pub mod sim;
