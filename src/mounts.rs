//! Local mount points served by backend R, and the persisted mount configurations.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};

use crate::{
    config::ConfigStore,
    error::{CoreError, Result},
    lock,
    path::normalize_mount_path,
    rclone::{RcloneApi, RcloneMountList},
    resolver::{resolve, ResolveOptions},
    storage::{BackendTag, StorageDirectory},
};

/// A mount the user configured, whether or not it is currently mounted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MountConfig {
    pub storage_name: String,
    pub mount_path: String,
    /// Extra `mount/mount` arguments such as `mountOpt` and `vfsOpt`.
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub auto_mount: bool,
}

/// A mount reported live by backend R.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MountEntry {
    pub storage_name: String,
    pub mount_path: String,
    pub mounted_at: String,
}

pub struct MountManager {
    directory: StorageDirectory,
    rclone: Arc<dyn RcloneApi>,
    config: Arc<dyn ConfigStore>,
    configured: Mutex<Vec<MountConfig>>,
    mounted: Mutex<Vec<MountEntry>>,
}

impl MountManager {
    pub fn load(
        directory: StorageDirectory,
        rclone: Arc<dyn RcloneApi>,
        config: Arc<dyn ConfigStore>,
    ) -> Result<Self> {
        let configured = config.load_mounts()?;
        Ok(Self {
            directory,
            rclone,
            config,
            configured: Mutex::new(configured),
            mounted: Mutex::new(Vec::new()),
        })
    }

    pub fn configured(&self) -> Result<Vec<MountConfig>> {
        Ok(lock(&self.configured)?.clone())
    }

    pub fn mounted(&self) -> Result<Vec<MountEntry>> {
        Ok(lock(&self.mounted)?.clone())
    }

    /// Rebuilds the live mount list from backend R.
    pub async fn refresh_mounts(&self) -> Result<Vec<MountEntry>> {
        let raw = self.rclone.post("mount/listmounts", json!({})).await?;
        let listing: RcloneMountList = serde_json::from_value(raw)?;

        let entries: Vec<MountEntry> = listing
            .mount_points
            .unwrap_or_default()
            .into_iter()
            .map(|point| MountEntry {
                storage_name: self.storage_for_fs(&point.fs),
                mount_path: point.mount_point,
                mounted_at: point.mounted_on,
            })
            .collect();

        tracing::debug!(mounts = entries.len(), "mount list refreshed");
        *lock(&self.mounted)? = entries.clone();
        Ok(entries)
    }

    /// Logical storage name behind an rclone file system string.
    ///
    /// Bridge file systems map to the longest backend-M name prefixing the inner path, since
    /// those names are mount paths that may span several segments.
    fn storage_for_fs(&self, fs: &str) -> String {
        let (container, inner) = fs.split_once(':').unwrap_or((fs, ""));
        if container != self.directory.bridge() {
            return container.to_string();
        }

        let inner = inner.trim_matches('/');
        let owner = self
            .directory
            .snapshot()
            .iter()
            .filter(|entry| entry.backend.tag() == BackendTag::Openlist)
            .map(|entry| entry.name.clone())
            .filter(|name| {
                inner
                    .strip_prefix(name.as_str())
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
            })
            .max_by_key(String::len);
        owner.unwrap_or_else(|| inner.split('/').next().unwrap_or_default().to_string())
    }

    /// Mounts the root of `storage_name` at `mount_path`.
    pub async fn mount(
        &self,
        storage_name: &str,
        mount_path: &str,
        parameters: &Map<String, Value>,
    ) -> Result<()> {
        let fs = resolve(&self.directory, storage_name, "/", ResolveOptions::dir())
            .ok_or_else(|| CoreError::Resolution(storage_name.to_string()))?;

        let mut body = Map::new();
        body.insert("fs".to_string(), Value::String(fs.clone()));
        body.insert(
            "mountPoint".to_string(),
            Value::String(mount_path.to_string()),
        );
        for (key, value) in parameters {
            body.insert(key.clone(), value.clone());
        }

        self.rclone.post("mount/mount", Value::Object(body)).await?;
        tracing::info!(storage = storage_name, %fs, mount_path, "mounted");
        self.refresh_mounts().await?;
        Ok(())
    }

    pub async fn unmount(&self, mount_path: &str) -> Result<()> {
        self.rclone
            .post("mount/unmount", json!({ "mountPoint": mount_path }))
            .await?;
        tracing::info!(mount_path, "unmounted");
        self.refresh_mounts().await?;
        Ok(())
    }

    pub fn is_mounted(&self, mount_path: &str) -> Result<bool> {
        let wanted = normalize_mount_path(mount_path);
        Ok(lock(&self.mounted)?
            .iter()
            .any(|entry| normalize_mount_path(&entry.mount_path) == wanted))
    }

    /// Inserts or replaces the configuration for the same normalized mount path.
    pub fn save_mount_config(&self, mount: MountConfig) -> Result<()> {
        if mount.mount_path.trim().is_empty() {
            return Err(CoreError::InvalidOperation(
                "Mount path cannot be empty".to_string(),
            ));
        }

        let key = normalize_mount_path(&mount.mount_path);
        let mut configured = lock(&self.configured)?;
        let mut next = configured.clone();
        match next
            .iter_mut()
            .find(|existing| normalize_mount_path(&existing.mount_path) == key)
        {
            Some(existing) => *existing = mount,
            None => next.push(mount),
        }
        self.config.save_mounts(&next)?;
        *configured = next;
        Ok(())
    }

    pub fn delete_mount_config(&self, mount_path: &str) -> Result<bool> {
        let key = normalize_mount_path(mount_path);
        let mut configured = lock(&self.configured)?;
        let next: Vec<MountConfig> = configured
            .iter()
            .filter(|existing| normalize_mount_path(&existing.mount_path) != key)
            .cloned()
            .collect();
        if next.len() == configured.len() {
            return Ok(false);
        }
        self.config.save_mounts(&next)?;
        *configured = next;
        Ok(true)
    }

    /// Mounts every `autoMount` configuration that is not already mounted.
    ///
    /// Failures are logged per mount; returns how many were mounted.
    pub async fn auto_mount(&self) -> Result<usize> {
        let pending: Vec<MountConfig> = self
            .configured()?
            .into_iter()
            .filter(|mount| mount.auto_mount)
            .collect();

        let mut mounted = 0;
        for mount in pending {
            if self.is_mounted(&mount.mount_path)? {
                continue;
            }
            match self
                .mount(&mount.storage_name, &mount.mount_path, &mount.parameters)
                .await
            {
                Ok(()) => mounted += 1,
                Err(err) => tracing::warn!(
                    storage = %mount.storage_name,
                    mount_path = %mount.mount_path,
                    error = %err,
                    "auto mount failed"
                ),
            }
        }
        Ok(mounted)
    }
}
