//! # Wait operation

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::info;

use super::{OpAction, OpCtx, OpEntry, OpKind, Operation};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Stand still for `RobotContext::wait_s`, then resume the pending goal.
pub struct Wait {
    wait_s: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Wait {
    pub fn new() -> Self {
        Self { wait_s: 0.0 }
    }
}

impl Operation for Wait {
    fn kind(&self) -> OpKind {
        OpKind::Wait
    }

    fn begin(&mut self, cx: &mut OpCtx, _entry: OpEntry) -> OpAction {
        self.wait_s = cx.ctx.wait_s;
        info!("Waiting for {:.1} s", self.wait_s);
        cx.drive.set_linear_angular_speed(0.0, 0.0, false);
        OpAction::None
    }

    fn run(&mut self, cx: &mut OpCtx) -> OpAction {
        if cx.elapsed_s() >= self.wait_s {
            OpAction::resume("wait over")
        } else {
            OpAction::None
        }
    }
}
