// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way.

use std::path::{Path, PathBuf};

/// Name of configuration file searched for in the current directory first.
pub const CONFIG_FILE_NAME: &str = "sitesnap.toml";

/// Determine default absolute path to the configuration file.
///
/// Prefers `./sitesnap.toml` when it exists, otherwise falls back to the XDG
/// Base Directory path `$XDG_CONFIG_HOME/sitesnap/sitesnap.toml`. Does not
/// check if the fallback path actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if the user configuration directory cannot be
///   determined.
pub fn default_config_file() -> Result<PathBuf> {
    let local = Path::new(CONFIG_FILE_NAME);
    if local.is_file() {
        return Ok(local.to_path_buf());
    }

    dirs::config_dir()
        .map(|path| path.join("sitesnap").join(CONFIG_FILE_NAME))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to the working clone directory.
///
/// Uses `$XDG_CACHE_HOME/sitesnap/working-clone`. Does not check if the path
/// returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if the user cache directory cannot be determined.
pub fn default_work_dir() -> Result<PathBuf> {
    dirs::cache_dir()
        .map(|path| path.join("sitesnap").join("working-clone"))
        .ok_or(NoWayHome)
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
