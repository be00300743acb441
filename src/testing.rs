//! Recording doubles for the transport and file-operation seams.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::Duration,
};

use crate::{
    config::ConfigStore,
    error::{CoreError, Result},
    mounts::MountConfig,
    openlist::{OpenlistApi, OpenlistStorage},
    operations::FileOperations,
    rclone::{ProgressFn, RcloneApi},
    storage::{Backend, SpaceInfo, StorageDirectory, StorageEntry},
    task::{RunConfig, TaskDefinition, TaskLocation, TimeOfDay},
};

pub const BRIDGE: &str = ".netmount-openlist.";

/// `S3` on backend R and `Alist` on backend M mounted at `/gdrive`.
pub fn sample_directory() -> StorageDirectory {
    let directory = StorageDirectory::new(BRIDGE);
    directory.replace(vec![
        StorageEntry {
            name: "S3".to_string(),
            backend: Backend::Rclone,
            driver: "s3".to_string(),
            space: SpaceInfo::UNKNOWN,
            hidden: false,
        },
        StorageEntry {
            name: "Alist".to_string(),
            backend: Backend::Openlist {
                id: 1,
                mount_path: "/gdrive".to_string(),
            },
            driver: "GoogleDrive".to_string(),
            space: SpaceInfo::UNKNOWN,
            hidden: false,
        },
    ]);
    directory
}

/// Enabled `S3:/src/ -> Alist:/dst/` task.
pub fn task(name: &str, task_type: &str, mode: &str) -> TaskDefinition {
    TaskDefinition {
        name: name.to_string(),
        task_type: task_type.to_string(),
        source: TaskLocation {
            storage_name: "S3".to_string(),
            path: "/src/".to_string(),
        },
        target: TaskLocation {
            storage_name: "Alist".to_string(),
            path: "/dst/".to_string(),
        },
        run: RunConfig {
            mode: mode.to_string(),
            time: TimeOfDay::default(),
            interval: 0,
        },
        enable: true,
        run_info: Default::default(),
    }
}

#[derive(Default)]
pub struct MockRclone {
    responses: Mutex<HashMap<String, Result<Value, String>>>,
    calls: Mutex<Vec<(String, Value)>>,
    uploads: Mutex<Vec<(String, String)>>,
}

impl MockRclone {
    pub fn respond(&self, endpoint: &str, body: Value) {
        self.responses
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), Ok(body));
    }

    pub fn fail(&self, endpoint: &str, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), Err(message.to_string()));
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.calls().into_iter().map(|(endpoint, _)| endpoint).collect()
    }

    /// `(fs, remote)` of every upload.
    pub fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl RcloneApi for MockRclone {
    async fn post(&self, endpoint: &str, body: Value) -> Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((endpoint.to_string(), body));
        match self.responses.lock().unwrap().get(endpoint) {
            Some(Ok(body)) => Ok(body.clone()),
            Some(Err(message)) => Err(CoreError::backend(endpoint, message.clone())),
            None => Ok(json!({})),
        }
    }

    async fn upload_file(
        &self,
        fs: &str,
        remote: &str,
        local_path: &Path,
        on_progress: ProgressFn,
    ) -> Result<Value> {
        let len = std::fs::metadata(local_path)?.len();
        on_progress(len, len);
        self.uploads
            .lock()
            .unwrap()
            .push((fs.to_string(), remote.to_string()));
        Ok(json!({}))
    }
}

#[derive(Default)]
pub struct MockOpenlist {
    storages: Mutex<Vec<OpenlistStorage>>,
    deleted: Mutex<Vec<i64>>,
    failing: bool,
}

impl MockOpenlist {
    pub fn with_storages(storages: Vec<OpenlistStorage>) -> Self {
        Self {
            storages: Mutex::new(storages),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn deleted(&self) -> Vec<i64> {
        self.deleted.lock().unwrap().clone()
    }

    fn check(&self, endpoint: &str) -> Result<()> {
        if self.failing {
            return Err(CoreError::backend(endpoint, "code=500, message=unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl OpenlistApi for MockOpenlist {
    async fn list_storages(&self) -> Result<Vec<OpenlistStorage>> {
        self.check("/api/admin/storage/list")?;
        Ok(self.storages.lock().unwrap().clone())
    }

    async fn get_storage(&self, id: i64) -> Result<OpenlistStorage> {
        self.check("/api/admin/storage/get")?;
        self.storages
            .lock()
            .unwrap()
            .iter()
            .find(|storage| storage.id == id)
            .cloned()
            .ok_or_else(|| CoreError::backend("/api/admin/storage/get", "storage not found"))
    }

    async fn delete_storage(&self, id: i64) -> Result<()> {
        self.check("/api/admin/storage/delete")?;
        self.storages.lock().unwrap().retain(|storage| storage.id != id);
        self.deleted.lock().unwrap().push(id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryConfigStore {
    tasks: Mutex<Vec<TaskDefinition>>,
    mounts: Mutex<Vec<MountConfig>>,
    read_only: AtomicBool,
}

impl MemoryConfigStore {
    pub fn with_tasks(tasks: Vec<TaskDefinition>) -> Self {
        Self {
            tasks: Mutex::new(tasks),
            ..Self::default()
        }
    }

    pub fn tasks(&self) -> Vec<TaskDefinition> {
        self.tasks.lock().unwrap().clone()
    }

    pub fn mounts(&self) -> Vec<MountConfig> {
        self.mounts.lock().unwrap().clone()
    }

    /// Makes every later save fail like a read-only config directory.
    pub fn fail_writes(&self, failing: bool) {
        self.read_only.store(failing, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "config directory is read-only",
            )
            .into());
        }
        Ok(())
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load_tasks(&self) -> Result<Vec<TaskDefinition>> {
        Ok(self.tasks())
    }

    fn save_tasks(&self, tasks: &[TaskDefinition]) -> Result<()> {
        self.check_writable()?;
        *self.tasks.lock().unwrap() = tasks.to_vec();
        Ok(())
    }

    fn load_mounts(&self) -> Result<Vec<MountConfig>> {
        Ok(self.mounts())
    }

    fn save_mounts(&self, mounts: &[MountConfig]) -> Result<()> {
        self.check_writable()?;
        *self.mounts.lock().unwrap() = mounts.to_vec();
        Ok(())
    }
}

/// Records each verb as `"verb src -> dst"` and optionally fails or stalls.
#[derive(Default)]
pub struct RecordingOps {
    calls: Mutex<Vec<String>>,
    failure: Option<String>,
    delay: Duration,
}

impl RecordingOps {
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn verbs(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|call| call.split(' ').next().unwrap_or_default().to_string())
            .collect()
    }

    async fn record(&self, call: String) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.failure {
            Some(message) => Err(CoreError::backend("sync/copy", message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl FileOperations for RecordingOps {
    async fn delete_file(&self, storage: &str, path: &str) -> Result<()> {
        self.record(format!("delete_file {storage}:{path}")).await
    }

    async fn delete_dir(&self, storage: &str, path: &str) -> Result<()> {
        self.record(format!("delete_dir {storage}:{path}")).await
    }

    async fn copy_file(
        &self,
        src_storage: &str,
        src_path: &str,
        dst_storage: &str,
        dst_path: &str,
        dest_is_exact_file: bool,
    ) -> Result<()> {
        self.record(format!(
            "copy_file {src_storage}:{src_path} -> {dst_storage}:{dst_path} exact={dest_is_exact_file}"
        ))
        .await
    }

    async fn move_file(
        &self,
        src_storage: &str,
        src_path: &str,
        dst_storage: &str,
        dst_path: &str,
        dest_is_exact_file: bool,
    ) -> Result<()> {
        self.record(format!(
            "move_file {src_storage}:{src_path} -> {dst_storage}:{dst_path} exact={dest_is_exact_file}"
        ))
        .await
    }

    async fn copy_dir(
        &self,
        src_storage: &str,
        src_path: &str,
        dst_storage: &str,
        dst_path: &str,
        _rename: Option<&str>,
    ) -> Result<()> {
        self.record(format!(
            "copy_dir {src_storage}:{src_path} -> {dst_storage}:{dst_path}"
        ))
        .await
    }

    async fn move_dir(
        &self,
        src_storage: &str,
        src_path: &str,
        dst_storage: &str,
        dst_path: &str,
        _rename: Option<&str>,
    ) -> Result<()> {
        self.record(format!(
            "move_dir {src_storage}:{src_path} -> {dst_storage}:{dst_path}"
        ))
        .await
    }

    async fn sync(
        &self,
        src_storage: &str,
        src_path: &str,
        dst_storage: &str,
        dst_path: &str,
        bidirectional: bool,
    ) -> Result<()> {
        let verb = if bidirectional { "bisync" } else { "sync" };
        self.record(format!(
            "{verb} {src_storage}:{src_path} -> {dst_storage}:{dst_path}"
        ))
        .await
    }
}

