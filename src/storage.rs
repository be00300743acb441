//! Registry of every storage known to either backend.
//!
//! The directory is an immutable snapshot behind an `Arc`; `refresh` builds a complete new
//! snapshot and swaps it in, so readers never observe a half-built list.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};

use crate::{
    error::{CoreError, Result},
    openlist::OpenlistApi,
    path,
    rclone::RcloneApi,
    resolver::ResolveOptions,
};

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BackendTag {
    Rclone,
    Openlist,
}

/// Owning backend of a storage, fixed when the directory snapshot is built.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "framework", rename_all = "kebab-case")]
pub enum Backend {
    Rclone,
    #[serde(rename_all = "camelCase")]
    Openlist { id: i64, mount_path: String },
}

impl Backend {
    pub fn tag(&self) -> BackendTag {
        match self {
            Self::Rclone => BackendTag::Rclone,
            Self::Openlist { .. } => BackendTag::Openlist,
        }
    }

    /// Builds the rclone address for `path` inside the storage called `name`.
    ///
    /// `path` must already have `/` mapped to empty.
    pub fn address(&self, name: &str, bridge: &str, path: &str, opts: ResolveOptions) -> String {
        let (container, inner) = match self {
            Self::Rclone => (name, path::normalize(path, opts.is_dir)),
            Self::Openlist { .. } => (bridge, path::normalize(&path::join(name, path), opts.is_dir)),
        };

        let mut address = String::new();
        if !opts.omit_name {
            address.push_str(container);
            address.push(':');
        }
        if !opts.only_name {
            address.push_str(&inner);
        }
        address
    }

    /// Maps a path returned by an rclone listing back to a path relative to the storage.
    pub fn logical_child_path(&self, name: &str, returned: &str) -> String {
        match self {
            Self::Rclone => returned.to_string(),
            Self::Openlist { .. } => {
                let returned = returned.trim_start_matches('/');
                match returned.strip_prefix(name) {
                    Some(rest) if rest.is_empty() || rest.starts_with('/') => {
                        rest.trim_start_matches('/').to_string()
                    }
                    _ => returned.to_string(),
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct SpaceInfo {
    pub free: i64,
    pub used: i64,
    pub total: i64,
}

impl SpaceInfo {
    /// Reported when the remote cannot answer a space query.
    pub const UNKNOWN: SpaceInfo = SpaceInfo {
        free: -1,
        used: -1,
        total: -1,
    };
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageEntry {
    pub name: String,
    pub backend: Backend,
    /// rclone remote type or openlist driver name.
    pub driver: String,
    pub space: SpaceInfo,
    pub hidden: bool,
}

impl StorageEntry {
    pub fn mount_path(&self) -> Option<&str> {
        match &self.backend {
            Backend::Openlist { mount_path, .. } => Some(mount_path),
            Backend::Rclone => None,
        }
    }
}

/// The only sanctioned way to hand storages to a presentation layer.
pub fn filter_hidden(list: &[StorageEntry]) -> Vec<StorageEntry> {
    list.iter().filter(|entry| !entry.hidden).cloned().collect()
}

#[derive(Clone)]
pub struct StorageDirectory {
    snapshot: Arc<RwLock<Arc<Vec<StorageEntry>>>>,
    bridge: Arc<str>,
}

impl StorageDirectory {
    pub fn new(bridge: &str) -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(Arc::new(Vec::new()))),
            bridge: Arc::from(bridge),
        }
    }

    pub fn bridge(&self) -> &str {
        &self.bridge
    }

    pub fn snapshot(&self) -> Arc<Vec<StorageEntry>> {
        match self.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Swaps in a complete list, flagging the bridge remote as hidden.
    pub fn replace(&self, mut entries: Vec<StorageEntry>) {
        for entry in &mut entries {
            entry.hidden = entry.name == *self.bridge;
        }
        let next = Arc::new(entries);
        match self.snapshot.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Rebuilds the directory from both backends.
    ///
    /// A failed list call leaves the current snapshot untouched.
    pub async fn refresh(
        &self,
        rclone: &dyn RcloneApi,
        openlist: Option<&dyn OpenlistApi>,
    ) -> Result<()> {
        let dump = rclone.post("config/dump", json!({})).await?;
        let remotes: BTreeMap<String, Value> = serde_json::from_value(dump)?;

        let mut entries = Vec::with_capacity(remotes.len());
        for (name, params) in remotes {
            let driver = params
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let space = query_space(rclone, &name).await;
            entries.push(StorageEntry {
                name,
                backend: Backend::Rclone,
                driver,
                space,
                hidden: false,
            });
        }

        if let Some(openlist) = openlist {
            for storage in openlist.list_storages().await? {
                entries.push(StorageEntry {
                    name: storage.mount_path.trim_start_matches('/').to_string(),
                    backend: Backend::Openlist {
                        id: storage.id,
                        mount_path: storage.mount_path,
                    },
                    driver: storage.driver,
                    space: SpaceInfo::UNKNOWN,
                    hidden: false,
                });
            }
        }

        tracing::info!(storages = entries.len(), "storage directory refreshed");
        self.replace(entries);
        Ok(())
    }

    /// First entry named `keyword`, or an openlist entry mounted at `keyword`.
    pub fn search(&self, keyword: &str) -> Option<StorageEntry> {
        self.snapshot()
            .iter()
            .find(|entry| entry.name == keyword || entry.mount_path() == Some(keyword))
            .cloned()
    }

    pub fn visible(&self) -> Vec<StorageEntry> {
        filter_hidden(&self.snapshot())
    }

    /// Backend-side configuration of a storage.
    pub async fn storage_params(
        &self,
        name: &str,
        rclone: &dyn RcloneApi,
        openlist: Option<&dyn OpenlistApi>,
    ) -> Result<Value> {
        let entry = self
            .search(name)
            .ok_or_else(|| CoreError::Resolution(name.to_string()))?;
        match entry.backend {
            Backend::Rclone => rclone.post("config/get", json!({ "name": entry.name })).await,
            Backend::Openlist { id, .. } => {
                let openlist = openlist.ok_or_else(|| {
                    CoreError::UnsupportedCapability("openlist is not configured".to_string())
                })?;
                Ok(serde_json::to_value(openlist.get_storage(id).await?)?)
            }
        }
    }

    /// Creates a backend-R remote, then refreshes the directory.
    ///
    /// Every key in `required` must be present in `parameters` with a non-empty value.
    pub async fn create_storage(
        &self,
        name: &str,
        storage_type: &str,
        parameters: &Map<String, Value>,
        required: &[String],
        rclone: &dyn RcloneApi,
        openlist: Option<&dyn OpenlistApi>,
    ) -> Result<()> {
        if name.trim().is_empty() {
            return Err(CoreError::InvalidOperation(
                "Storage name cannot be empty".to_string(),
            ));
        }
        if name == self.bridge() {
            return Err(CoreError::InvalidOperation(format!(
                "Storage {name} is reserved"
            )));
        }
        if self.search(name).is_some() {
            return Err(CoreError::InvalidOperation(format!(
                "Storage already exists: {name}"
            )));
        }
        if let Some(missing) = required
            .iter()
            .find(|key| parameters.get(key.as_str()).map_or(true, is_blank))
        {
            return Err(CoreError::InvalidOperation(format!(
                "Missing parameter: {missing}"
            )));
        }

        rclone
            .post(
                "config/create",
                json!({ "name": name, "type": storage_type, "parameters": parameters }),
            )
            .await?;
        tracing::info!(storage = name, storage_type, "storage created");
        self.refresh(rclone, openlist).await
    }

    /// Removes a storage from its backend, then refreshes the directory.
    pub async fn delete_storage(
        &self,
        name: &str,
        rclone: &dyn RcloneApi,
        openlist: Option<&dyn OpenlistApi>,
    ) -> Result<()> {
        let entry = self
            .search(name)
            .ok_or_else(|| CoreError::Resolution(name.to_string()))?;
        if entry.hidden {
            return Err(CoreError::InvalidOperation(format!(
                "Storage {name} is reserved"
            )));
        }

        match entry.backend {
            Backend::Rclone => {
                rclone
                    .post("config/delete", json!({ "name": entry.name }))
                    .await?;
            }
            Backend::Openlist { id, .. } => {
                let openlist = openlist.ok_or_else(|| {
                    CoreError::UnsupportedCapability("openlist is not configured".to_string())
                })?;
                openlist.delete_storage(id).await?;
            }
        }
        tracing::info!(storage = name, "storage deleted");
        self.refresh(rclone, openlist).await
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => true,
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

async fn query_space(rclone: &dyn RcloneApi, name: &str) -> SpaceInfo {
    let about = match rclone
        .post("operations/about", json!({ "fs": format!("{name}:") }))
        .await
    {
        Ok(about) => about,
        Err(err) => {
            tracing::debug!(storage = name, error = %err, "space query unsupported");
            return SpaceInfo::UNKNOWN;
        }
    };

    let field = |key: &str| about.get(key).and_then(Value::as_i64).unwrap_or(-1);
    SpaceInfo {
        free: field("free"),
        used: field("used"),
        total: field("total"),
    }
}
