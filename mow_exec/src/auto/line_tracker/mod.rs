//! # Line Tracker Module
//!
//! The line tracker steers the mower along the segment between the last target and the current
//! target supplied by the path generator. Each cycle it either rotates on the spot towards the
//! target, when the heading error is too large, or tracks the line with a Stanley controller at
//! the lowest applicable speed limit.
//!
//! The tracker also watches for navigation level conditions (GPS fix timeout, kidnapping, dock
//! approach timeouts) and reports them as [`TrackEvent`]s for the active operation.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod controllers;
mod params;
mod state;

// ---------------------------------------------------------------------------
// EXPORTS
// ---------------------------------------------------------------------------

pub use controllers::{distance_to_segment, lateral_error};
pub use params::{Params, StanleyGains};
pub use state::*;
