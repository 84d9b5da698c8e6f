//! Host platform utility functions

use std::{env, path::PathBuf};

/// Environment variable giving the root of the software tree, under which `params/` and the
/// sessions directory live.
pub const SW_ROOT_ENV_VAR: &str = "MOWER_SW_ROOT";

/// Get the root directory of the software tree.
pub fn get_mower_sw_root() -> Result<PathBuf, env::VarError> {
    env::var(SW_ROOT_ENV_VAR).map(PathBuf::from)
}
