//! # OpMgr Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use super::{
    charge::ChargeParams,
    dock::DockParams,
    escape::EscapeParams,
    gps_reboot::GpsRebootParams,
    gps_wait::{GpsWaitFixParams, GpsWaitFloatParams},
    idle::IdleParams,
    imu_calibration::ImuCalibrationParams,
    kidnap_wait::KidnapWaitParams,
    mow::MowParams,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OpMgrParams {
    pub idle: IdleParams,

    pub imu_calibration: ImuCalibrationParams,

    pub mow: MowParams,

    pub escape: EscapeParams,

    pub dock: DockParams,

    pub charge: ChargeParams,

    pub kidnap_wait: KidnapWaitParams,

    pub gps_wait_fix: GpsWaitFixParams,

    pub gps_wait_float: GpsWaitFloatParams,

    pub gps_reboot: GpsRebootParams,
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_partial_file() {
        let params: OpMgrParams = util::params::parse(
            r#"
            [dock]
            max_retries = 5

            [charge]
            auto_resume_mow = false
            "#,
        )
        .unwrap();

        assert_eq!(params.dock.max_retries, 5);
        assert!(!params.charge.auto_resume_mow);

        // Everything else keeps its default
        assert_eq!(params.mow.max_route_failures, 3);
        assert_eq!(params.escape.max_in_window, 6);
    }
}
