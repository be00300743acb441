use std::path::PathBuf;

use crate::error::{CoreError, Result};

pub fn mountdeck_config_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os("MOUNTDECK_CONFIG_DIR") {
        return Ok(PathBuf::from(dir));
    }

    let home = if cfg!(target_os = "windows") {
        std::env::var("USERPROFILE")
            .or_else(|_| std::env::var("HOME"))
            .map_err(|_| CoreError::Config("Unable to resolve USERPROFILE/HOME".to_string()))?
    } else {
        std::env::var("HOME")
            .map_err(|_| CoreError::Config("Unable to resolve HOME".to_string()))?
    };

    let mut path = PathBuf::from(home);
    if cfg!(target_os = "macos") {
        path.push("Library");
        path.push("Application Support");
        path.push("mountdeck");
    } else {
        path.push(".config");
        path.push("mountdeck");
    }
    Ok(path)
}

pub fn settings_path() -> Result<PathBuf> {
    Ok(mountdeck_config_dir()?.join("settings.json"))
}

pub fn log_dir() -> Result<PathBuf> {
    Ok(mountdeck_config_dir()?.join("logs"))
}

pub const TASKS_FILE: &str = "tasks.json";
pub const MOUNTS_FILE: &str = "mounts.json";
