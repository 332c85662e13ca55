pub mod settings;

pub use settings::*;

use crate::error::AppResult;
use std::path::PathBuf;

/// Get the sysdeck config directory
pub fn get_config_dir() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .ok_or_else(|| crate::error::AppError::Config("Could not find config directory".into()))?
        .join("sysdeck");

    Ok(config_dir)
}

/// Path of the known_hosts file maintained by the SSH connector
pub fn get_known_hosts_path() -> AppResult<PathBuf> {
    Ok(get_config_dir()?.join("known_hosts"))
}
