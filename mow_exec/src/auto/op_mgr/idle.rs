//! # Idle operation

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::info;
use serde::Deserialize;

use super::{OpAction, OpCtx, OpEntry, OpKind, Operation};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Motors off, waiting for an operator command.
///
/// Possible transitions:
/// - Charge, when the charger is connected
pub struct Idle;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct IdleParams {
    /// Time in Idle after which a charger contact means the mower was parked on the dock by hand
    pub charger_park_delay_s: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for IdleParams {
    fn default() -> Self {
        Self {
            charger_park_delay_s: 3.0,
        }
    }
}

impl Idle {
    pub fn new() -> Self {
        Self
    }
}

impl Operation for Idle {
    fn kind(&self) -> OpKind {
        OpKind::Idle
    }

    fn begin(&mut self, cx: &mut OpCtx, _entry: OpEntry) -> OpAction {
        cx.stop_motors();
        OpAction::None
    }

    fn run(&mut self, cx: &mut OpCtx) -> OpAction {
        if !cx.ctx.frame.battery.charger_connected {
            return OpAction::None;
        }

        // Placed on the dock by hand, or stopped there by the operator: charge without going back
        // to mowing afterwards
        if cx.elapsed_s() > cx.params.idle.charger_park_delay_s || cx.base.initiated_by_operator {
            info!("Charger connected while idle, parked by operator");
            cx.ctx.parked_by_operator = true;
        }

        OpAction::change(OpKind::Charge, "charger connected")
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
