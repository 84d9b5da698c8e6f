//! # Mower Executable Parameters
//!
//! This module provides parameters for the mower executable, loaded from `mow_exec.toml`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use crate::{auto::path::PathParams, context::RobotParams, sim::SimParams};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MowExecParams {
    /// Stop after this many seconds, run until interrupted if `None`
    pub run_limit_s: Option<f64>,

    /// Interval between telemetry log lines
    pub tm_log_period_s: f64,

    pub robot: RobotParams,

    pub path: PathParams,

    pub sim: SimParams,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for MowExecParams {
    fn default() -> Self {
        Self {
            run_limit_s: None,
            tm_log_period_s: 5.0,
            robot: RobotParams::default(),
            path: PathParams::default(),
            sim: SimParams::default(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
