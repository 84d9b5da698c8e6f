//! Main mower executable entry point.
//!
//! # Architecture
//!
//! The general execution methodology consists of:
//!
//!     - Initialise all modules
//!     - Main loop:
//!         - Step the simulated driver layer, producing a sensor frame
//!         - Robot cycle:
//!             - State estimation
//!             - Robot event and anomaly detection
//!             - Active operation processing (line tracking, escapes, docking, ...)
//!         - Telemetry logging
//!         - Sleep until the next cycle, the period depending on the active operation
//!
//! An operator command may be given on the command line, it is executed once the modules are
//! initialised.

// ---------------------------------------------------------------------------
// USE MODULES FROM LIBRARY
// ---------------------------------------------------------------------------

use comms_if::tc::OpCmd;
use mow_lib::{
    auto::{detect::AnomalyDetector, loc::Pose, op_mgr::OpMgr, path::WaypointPath},
    context::{DriverRequests, Robot, RobotContext},
    params::MowExecParams,
    persist::SessionStorage,
    sim::SimRobot,
};

mod tc_processor;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use structopt::StructOpt;

// Internal
use util::{
    host,
    logger::{logger_init, LevelFilter},
    module::State,
    session::{self, Session},
    time::SessionClock,
};

// ---------------------------------------------------------------------------
// STRUCTS
// ---------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(
    name = "mow_exec",
    about = "Mower navigation core running against the kinematic simulator"
)]
struct Opts {
    /// State file of a previous session to restore the anomaly counters from
    #[structopt(long, parse(from_os_str))]
    restore: Option<PathBuf>,

    /// Command to execute once initialised
    #[structopt(subcommand)]
    cmd: Option<OpCmd>,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("mow_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Mower Navigation Executable\n");
    info!(
        "Software root: {:?}",
        host::get_mower_sw_root().wrap_err("Failed to get the software root")?
    );
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let params: MowExecParams =
        util::params::load("mow_exec.toml").wrap_err("Could not load exec params")?;

    info!("Exec parameters loaded");

    // ---- INITIALISE MODULES ----

    info!("Initialising modules...");

    let mut sim = SimRobot::new(params.sim.clone());

    let path = WaypointPath::from_params(&params.path);
    let mut ctx = RobotContext::new(Box::new(path), &params.robot);

    ctx.estimator
        .init("loc.toml", &session)
        .wrap_err("Failed to initialise the state estimator")?;
    let [x, y, heading] = params.sim.start_pose;
    ctx.estimator.set_pose(Pose::new(x, y, heading));
    info!("StateEstimator init complete");

    ctx.detector = AnomalyDetector::new(
        util::params::load("detect.toml").wrap_err("Failed to load the anomaly detector params")?,
    );
    info!("AnomalyDetector init complete");

    ctx.tracker
        .init("line_tracker.toml", &session)
        .wrap_err("Failed to initialise the line tracker")?;
    info!("LineTracker init complete");

    let op_mgr = OpMgr::init("op_mgr.toml").wrap_err("Failed to initialise the OpMgr")?;
    info!("OpMgr init complete");

    let storage = SessionStorage::new(session.saver(), opts.restore);

    let mut robot = Robot::new(
        ctx,
        op_mgr,
        params.robot.clone(),
        Box::new(SessionClock),
        Box::new(storage),
    );

    // A broken state file only costs the counters, so carry on without it
    if let Err(e) = robot.restore() {
        warn!("Could not restore the operation state: {}", e);
    }

    info!("Module initialisation complete\n");

    if let Some(cmd) = opts.cmd {
        tc_processor::exec(&mut robot, &mut sim, cmd);
    }

    // ---- MAIN LOOP ----

    info!("Beginning main loop\n");

    let mut last_step_s = session::get_elapsed_seconds();
    let mut last_tm_s: Option<f64> = None;
    let mut requests = DriverRequests::default();

    loop {
        // Get cycle start time
        let cycle_start_instant = Instant::now();
        let now_s = session::get_elapsed_seconds();

        // ---- DATA INPUT ----

        let frame = sim.step(now_s - last_step_s);
        last_step_s = now_s;

        // ---- ROBOT PROCESSING ----

        robot.tick(frame, &mut sim);

        // ---- DRIVER REQUESTS ----

        if robot.ctx.requests.gps_reboots > requests.gps_reboots {
            info!("GPS receiver reboot requested");
        }
        if robot.ctx.requests.imu_restarts > requests.imu_restarts {
            info!("IMU restart requested");
        }
        requests = robot.ctx.requests;
        sim.service_requests(requests);

        // ---- TELEMETRY ----

        if last_tm_s.map_or(true, |t| now_s - t >= params.tm_log_period_s) {
            last_tm_s = Some(now_s);

            let tm = robot.get_tm();
            info!(
                "{} at ({:.2}, {:.2}, {:.0} deg), GPS {:?}, {} obstacles, {} transitions",
                tm.chain,
                tm.x_m,
                tm.y_m,
                tm.heading_rad.to_degrees(),
                tm.gps_solution,
                tm.counters.obstacles,
                tm.transitions
            );
            session.save("tm/nav_tm.json", tm);
        }

        if let Some(limit_s) = params.run_limit_s {
            if now_s >= limit_s {
                info!("Run limit of {:.0} s reached, stopping", limit_s);
                break;
            }
        }

        // ---- CYCLE MANAGEMENT ----

        let cycle_period = Duration::from_secs_f64(robot.cycle_period_s());
        let cycle_dur = Instant::now() - cycle_start_instant;

        // Get sleep duration
        match cycle_period.checked_sub(cycle_dur) {
            Some(d) => thread::sleep(d),
            None => warn!(
                "Cycle overran by {:.06} s",
                cycle_dur.as_secs_f64() - cycle_period.as_secs_f64()
            ),
        }
    }

    // ---- SHUTDOWN ----

    debug!("Final state: {:?}", robot.get_tm());
    info!("End of execution");

    session.exit();

    Ok(())
}
