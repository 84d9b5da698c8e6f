//! # Kidnap wait operation

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::info;
use serde::Deserialize;

use super::{ErrorCause, OpAction, OpCtx, OpEntry, OpKind, Operation};
use crate::auto::line_tracker::distance_to_segment;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The mower is far from its path. Stand still until the position comes back within the kidnap
/// tolerance, rebooting the GPS receiver every `recover_time_s`.
///
/// Possible transitions:
/// - Resume once back near the path
/// - GpsRebootRecovery on each recovery attempt (returning)
/// - Error after `max_recoveries` attempts
pub struct KidnapWait {
    recoveries: u32,
    next_recover_s: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct KidnapWaitParams {
    pub recover_time_s: f64,
    pub max_recoveries: u32,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for KidnapWaitParams {
    fn default() -> Self {
        Self {
            recover_time_s: 30.0,
            max_recoveries: 3,
        }
    }
}

impl KidnapWait {
    pub fn new() -> Self {
        Self {
            recoveries: 0,
            next_recover_s: 0.0,
        }
    }
}

impl Operation for KidnapWait {
    fn kind(&self) -> OpKind {
        OpKind::KidnapWait
    }

    fn begin(&mut self, cx: &mut OpCtx, entry: OpEntry) -> OpAction {
        if entry == OpEntry::Fresh {
            self.recoveries = 0;
        }
        self.next_recover_s = cx.now_s() + cx.params.kidnap_wait.recover_time_s;
        cx.stop_motors();
        OpAction::None
    }

    fn run(&mut self, cx: &mut OpCtx) -> OpAction {
        let pair = cx.ctx.path.get_target_pair();
        let pose = cx.pose();
        let dist_m = distance_to_segment(&pair, &pose.position_m);

        if dist_m < cx.ctx.tracker.params().kidnap_path_tolerance_m {
            info!("Position recovered, {:.2} m from the path", dist_m);
            return OpAction::resume("position recovered");
        }

        if cx.now_s() < self.next_recover_s {
            return OpAction::None;
        }

        self.recoveries += 1;
        if self.recoveries > cx.params.kidnap_wait.max_recoveries {
            return cx.escalate(ErrorCause::KidnapRecoveryFailed);
        }

        OpAction::call(
            OpKind::GpsRebootRecovery,
            format!("kidnap recovery {}", self.recoveries),
        )
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
