//! Filesystem path helpers

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Name of the per-user configuration directory
pub const APP_DIR_NAME: &str = "spacedrop";

/// File name of the policy document inside the configuration directory
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Home directory of the user owning this process
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(Error::HomeNotFound)
}

/// Expand a leading `~` against `home`.
///
/// Only `~` on its own and `~/...` are expanded; `~other/...` is left alone.
pub fn expand_home_with(path: &str, home: &Path) -> PathBuf {
    if path == "~" {
        return home.to_path_buf();
    }
    match path.strip_prefix("~/") {
        Some(rest) => home.join(rest),
        None => PathBuf::from(path),
    }
}

/// Expand a leading `~` against the current user's home directory
pub fn expand_home(path: &str) -> Result<PathBuf> {
    if path == "~" || path.starts_with("~/") {
        Ok(expand_home_with(path, &home_dir()?))
    } else {
        Ok(PathBuf::from(path))
    }
}

/// Default configuration directory (`~/.config/spacedrop`)
pub fn default_config_dir() -> Result<PathBuf> {
    Ok(home_dir()?.join(".config").join(APP_DIR_NAME))
}

/// Default policy file path (`~/.config/spacedrop/config.json`)
pub fn default_config_path() -> Result<PathBuf> {
    Ok(default_config_dir()?.join(CONFIG_FILE_NAME))
}
