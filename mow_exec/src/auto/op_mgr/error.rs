//! # Error operation

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::error;

use super::{OpAction, OpCtx, OpEntry, OpKind, Operation};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// All motors stopped until the operator acknowledges the error.
///
/// The manager refuses operator commands while Error is active, the only way out is
/// [`OpMgr::acknowledge_error`](super::OpMgr::acknowledge_error).
pub struct Error;

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Error {
    pub fn new() -> Self {
        Self
    }
}

impl Operation for Error {
    fn kind(&self) -> OpKind {
        OpKind::Error
    }

    fn begin(&mut self, cx: &mut OpCtx, _entry: OpEntry) -> OpAction {
        match cx.ctx.error_cause {
            Some(cause) => error!("Mower stopped: {}", cause),
            None => error!("Mower stopped"),
        }

        cx.drive.stop_immediately();
        cx.drive.set_mow_state(false);
        OpAction::None
    }

    fn run(&mut self, cx: &mut OpCtx) -> OpAction {
        cx.stop_motors();
        OpAction::None
    }

    /// Stop requests don't leave Error.
    fn check_stop(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::None
    }
}
