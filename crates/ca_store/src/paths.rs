//! Canonical on-disk locations.

use std::path::PathBuf;

use directories::BaseDirs;

use crate::error::StoreError;

pub const BASE_DIR_NAME: &str = ".commands-agent";

pub fn base_dir() -> Result<PathBuf, StoreError> {
    let dirs = BaseDirs::new().ok_or(StoreError::NoHomeDir)?;
    Ok(dirs.home_dir().join(BASE_DIR_NAME))
}

pub fn config_path() -> Result<PathBuf, StoreError> {
    Ok(base_dir()?.join("config.json"))
}

pub fn credentials_path() -> Result<PathBuf, StoreError> {
    Ok(base_dir()?.join("credentials.enc"))
}

pub fn desktop_settings_path() -> Result<PathBuf, StoreError> {
    Ok(base_dir()?.join("desktop-settings.json"))
}

pub fn profiles_dir() -> Result<PathBuf, StoreError> {
    Ok(base_dir()?.join("profiles"))
}
