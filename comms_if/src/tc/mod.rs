//! # Telecommand module
//!
//! Commands an operator (button, app or command line) can send to the navigation core.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use structopt::StructOpt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// An operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, StructOpt)]
pub enum OpCmd {
    /// Stop all motion and stay idle.
    #[structopt(name = "idle")]
    Idle,

    /// Start, or continue, mowing.
    #[structopt(name = "mow")]
    Mow,

    /// Return to the docking station.
    #[structopt(name = "dock")]
    Dock,

    /// Abort the current operation, stopping at the next cycle.
    #[structopt(name = "stop")]
    Stop,

    /// Acknowledge a latched error, returning to idle.
    #[structopt(name = "ack")]
    AckError,
}

/// Possible parsing errors.
#[derive(Debug, Error)]
pub enum TcParseError {
    #[error("TC contains invalid JSON: {0}")]
    InvalidJson(serde_json::Error),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl OpCmd {
    /// Parse a command from its JSON representation, e.g. `"Mow"`.
    pub fn from_json(json_str: &str) -> Result<Self, TcParseError> {
        serde_json::from_str(json_str).map_err(TcParseError::InvalidJson)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_from_json() {
        assert_eq!(OpCmd::from_json("\"Dock\"").unwrap(), OpCmd::Dock);
        assert!(OpCmd::from_json("\"Fly\"").is_err());
    }

    #[test]
    fn test_from_args() {
        let cmd = OpCmd::from_iter_safe(&["mow_exec", "mow"]).unwrap();
        assert_eq!(cmd, OpCmd::Mow);

        let cmd = OpCmd::from_iter_safe(&["mow_exec", "ack"]).unwrap();
        assert_eq!(cmd, OpCmd::AckError);
    }
}
