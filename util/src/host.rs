//! Host platform (linux for example) utility functions

use std::{env, path::PathBuf};

/// Environment variable pointing at the root of the palletizer software tree.
pub const SW_ROOT_ENV: &str = "PAL_SW_ROOT";

/// Retrieve uname information.
pub fn get_uname() -> std::io::Result<uname::Info> {
    uname::uname()
}

/// Get the root of the software tree from the `PAL_SW_ROOT` environment variable.
pub fn get_sw_root() -> Result<PathBuf, env::VarError> {
    env::var(SW_ROOT_ENV).map(PathBuf::from)
}
