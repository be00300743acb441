use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use url::Url;

use crate::{
    config_paths::{self, MOUNTS_FILE, TASKS_FILE},
    error::{CoreError, Result},
    mounts::MountConfig,
    task::TaskDefinition,
};

pub const DEFAULT_BRIDGE_REMOTE: &str = ".netmount-openlist.";
const DEFAULT_RCLONE_URL: &str = "http://127.0.0.1:5572";
const DEFAULT_LOG_FILTER: &str = "mountdeck=info";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RcloneEndpoint {
    pub url: String,
    pub user: String,
    pub pass: String,
}

impl Default for RcloneEndpoint {
    fn default() -> Self {
        Self {
            url: DEFAULT_RCLONE_URL.to_string(),
            user: String::new(),
            pass: String::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct OpenlistEndpoint {
    pub url: String,
    pub token: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub rclone: RcloneEndpoint,
    pub openlist: Option<OpenlistEndpoint>,
    /// Reserved rclone remote through which openlist storages are reached.
    pub bridge_remote: String,
    pub log_filter: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            rclone: RcloneEndpoint::default(),
            openlist: None,
            bridge_remote: DEFAULT_BRIDGE_REMOTE.to_string(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl AppSettings {
    /// Reads `settings.json` (defaults when absent) and applies `MOUNTDECK_*` overrides.
    pub fn load() -> Result<Self> {
        let mut settings = Self::load_from(&config_paths::settings_path()?)?;
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .map_err(|err| CoreError::Config(format!("Failed to read {}: {err}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|err| CoreError::Config(format!("Invalid settings {}: {err}", path.display())))
    }

    fn apply_env_overrides(&mut self) {
        if let Some(url) = env_var_non_empty("MOUNTDECK_RCLONE_URL") {
            self.rclone.url = url;
        }
        if let Some(user) = env_var_non_empty("MOUNTDECK_RCLONE_USER") {
            self.rclone.user = user;
        }
        if let Some(pass) = env_var_non_empty("MOUNTDECK_RCLONE_PASS") {
            self.rclone.pass = pass;
        }
        if let Some(url) = env_var_non_empty("MOUNTDECK_OPENLIST_URL") {
            self.openlist.get_or_insert_with(OpenlistEndpoint::default).url = url;
        }
        if let Some(token) = env_var_non_empty("MOUNTDECK_OPENLIST_TOKEN") {
            self.openlist.get_or_insert_with(OpenlistEndpoint::default).token = token;
        }
        if let Some(bridge) = env_var_non_empty("MOUNTDECK_BRIDGE_REMOTE") {
            self.bridge_remote = bridge;
        }
    }

    pub fn validate(&self) -> Result<()> {
        parse_endpoint(&self.rclone.url)?;
        if let Some(openlist) = &self.openlist {
            parse_endpoint(&openlist.url)?;
        }
        if self.bridge_remote.trim().is_empty() || self.bridge_remote.contains(':') {
            return Err(CoreError::Config(format!(
                "Invalid bridge remote name: {:?}",
                self.bridge_remote
            )));
        }
        Ok(())
    }
}

pub fn parse_endpoint(value: &str) -> Result<Url> {
    let url = Url::parse(value)
        .map_err(|err| CoreError::Config(format!("Invalid endpoint {value:?}: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(CoreError::Config(format!(
            "Unsupported endpoint scheme: {}",
            url.scheme()
        )));
    }
    Ok(url)
}

fn env_var_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Persistence for task definitions and configured mounts.
pub trait ConfigStore: Send + Sync {
    fn load_tasks(&self) -> Result<Vec<TaskDefinition>>;
    fn save_tasks(&self, tasks: &[TaskDefinition]) -> Result<()>;
    fn load_mounts(&self) -> Result<Vec<MountConfig>>;
    fn save_mounts(&self, mounts: &[MountConfig]) -> Result<()>;
}

/// Pretty-printed JSON files in the config directory.
pub struct JsonConfigStore {
    dir: PathBuf,
}

impl JsonConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn open_default() -> Result<Self> {
        Ok(Self::new(config_paths::mountdeck_config_dir()?))
    }
}

impl ConfigStore for JsonConfigStore {
    fn load_tasks(&self) -> Result<Vec<TaskDefinition>> {
        load_list_from_disk(&self.dir.join(TASKS_FILE))
    }

    fn save_tasks(&self, tasks: &[TaskDefinition]) -> Result<()> {
        save_list_to_disk(&self.dir.join(TASKS_FILE), tasks)
    }

    fn load_mounts(&self) -> Result<Vec<MountConfig>> {
        load_list_from_disk(&self.dir.join(MOUNTS_FILE))
    }

    fn save_mounts(&self, mounts: &[MountConfig]) -> Result<()> {
        save_list_to_disk(&self.dir.join(MOUNTS_FILE), mounts)
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn load_list_from_disk<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&raw)?)
}

fn save_list_to_disk<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    ensure_parent_dir(path)?;
    let payload = serde_json::to_string_pretty(items)?;
    fs::write(path, payload)?;
    Ok(())
}
