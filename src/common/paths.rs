//! Filesystem locations for harness state

use directories::ProjectDirs;
use std::path::PathBuf;

/// Path to the harness config file, if a home directory can be resolved.
pub fn config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "agent-harness").map(|dirs| dirs.config_dir().join("config.toml"))
}
