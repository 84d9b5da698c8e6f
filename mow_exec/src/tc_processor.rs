//! # Telecommand processor module
//!
//! The telecommand processor handles operator commands coming from any source.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::debug;

// Internal
use comms_if::tc::OpCmd;
use mow_lib::{auto::op_mgr::OpType, context::Robot, drive::Drive};

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Execute an operator command.
///
/// Commands are passed straight to the operation manager, which decides whether they can be
/// acted upon.
pub(crate) fn exec(robot: &mut Robot, drive: &mut dyn Drive, cmd: OpCmd) {
    debug!("Received {:?} command", cmd);

    let op = match cmd {
        OpCmd::Idle => OpType::Idle,
        OpCmd::Mow => OpType::Mow,
        OpCmd::Dock => OpType::Dock,
        OpCmd::Stop => {
            robot.op_mgr.request_stop();
            return;
        }
        OpCmd::AckError => {
            robot.op_mgr.acknowledge_error(&mut robot.ctx, drive);
            return;
        }
    };

    robot
        .op_mgr
        .set_operation(&mut robot.ctx, drive, op, false);
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use mow_lib::{
        auto::{
            op_mgr::{OpKind, OpMgr, OpMgrParams},
            path::WaypointPath,
        },
        context::{RobotContext, RobotParams},
        persist::MemStorage,
        sim::{SimParams, SimRobot},
    };
    use nalgebra::Vector2;
    use util::time::FakeClock;

    fn robot() -> Robot {
        let params = RobotParams {
            imu_calibration_on_start: false,
            ..Default::default()
        };
        let path = WaypointPath::new(vec![Vector2::new(5.0, 0.0)], vec![Vector2::new(-1.0, 0.0)]);

        Robot::new(
            RobotContext::new(Box::new(path), &params),
            OpMgr::new(OpMgrParams::default()),
            params,
            Box::new(FakeClock::new(0.0)),
            Box::new(MemStorage::new()),
        )
    }

    #[test]
    fn test_commands() {
        let mut robot = robot();
        let mut sim = SimRobot::new(SimParams::default());

        exec(&mut robot, &mut sim, OpCmd::Mow);
        assert_eq!(robot.op_mgr.active(), OpKind::Mow);
        assert!(robot.op_mgr.base(OpKind::Mow).initiated_by_operator);

        exec(&mut robot, &mut sim, OpCmd::Dock);
        assert_eq!(robot.op_mgr.active(), OpKind::Dock);

        exec(&mut robot, &mut sim, OpCmd::Stop);
        assert!(robot.op_mgr.base(OpKind::Dock).should_stop);

        exec(&mut robot, &mut sim, OpCmd::Idle);
        assert_eq!(robot.op_mgr.active(), OpKind::Idle);
    }
}
