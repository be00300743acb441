//! One function per file verb, each resolving every address before touching a backend.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use walkdir::WalkDir;

use crate::{
    error::{CoreError, Result},
    path,
    rclone::{ProgressFn, RcloneApi, RcloneListResponse},
    resolver::{resolve_entry, ResolveOptions},
    storage::{StorageDirectory, StorageEntry},
};

/// A directory child with its path relative to the storage root.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub storage_name: String,
    pub path: String,
    pub name: String,
    pub size: i64,
    pub mime_type: String,
    pub mod_time: String,
    pub is_dir: bool,
}

impl FileEntry {
    /// `storageName/relativePath`.
    pub fn logical_path(&self) -> String {
        path::join(&self.storage_name, &self.path)
    }
}

/// The verbs the task runner dispatches to.
#[async_trait]
pub trait FileOperations: Send + Sync {
    async fn delete_file(&self, storage: &str, path: &str) -> Result<()>;
    async fn delete_dir(&self, storage: &str, path: &str) -> Result<()>;

    async fn copy_file(
        &self,
        src_storage: &str,
        src_path: &str,
        dst_storage: &str,
        dst_path: &str,
        dest_is_exact_file: bool,
    ) -> Result<()>;

    async fn move_file(
        &self,
        src_storage: &str,
        src_path: &str,
        dst_storage: &str,
        dst_path: &str,
        dest_is_exact_file: bool,
    ) -> Result<()>;

    async fn copy_dir(
        &self,
        src_storage: &str,
        src_path: &str,
        dst_storage: &str,
        dst_path: &str,
        rename: Option<&str>,
    ) -> Result<()>;

    async fn move_dir(
        &self,
        src_storage: &str,
        src_path: &str,
        dst_storage: &str,
        dst_path: &str,
        rename: Option<&str>,
    ) -> Result<()>;

    async fn sync(
        &self,
        src_storage: &str,
        src_path: &str,
        dst_storage: &str,
        dst_path: &str,
        bidirectional: bool,
    ) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Transfer {
    Copy,
    Move,
}

impl Transfer {
    fn file_endpoint(self) -> &'static str {
        match self {
            Self::Copy => "operations/copyfile",
            Self::Move => "operations/movefile",
        }
    }
}

pub struct OperationExecutor {
    directory: StorageDirectory,
    rclone: Arc<dyn RcloneApi>,
}

impl OperationExecutor {
    pub fn new(directory: StorageDirectory, rclone: Arc<dyn RcloneApi>) -> Self {
        Self { directory, rclone }
    }

    fn entry(&self, storage: &str) -> Result<StorageEntry> {
        self.directory
            .search(storage)
            .ok_or_else(|| CoreError::Resolution(storage.to_string()))
    }

    fn address(&self, entry: &StorageEntry, path: &str, opts: ResolveOptions) -> String {
        resolve_entry(entry, self.directory.bridge(), path, opts)
    }

    /// `(fs, remote)` pair for endpoints that take container and child separately.
    fn split(&self, storage: &str, path: &str, is_dir: bool) -> Result<(String, String)> {
        let entry = self.entry(storage)?;
        Ok((
            self.address(&entry, path, ResolveOptions::container()),
            self.address(&entry, path, ResolveOptions::remote(is_dir)),
        ))
    }

    pub async fn list(&self, storage: &str, dir: &str) -> Result<Vec<FileEntry>> {
        let entry = self.entry(storage)?;
        let fs = self.address(&entry, dir, ResolveOptions::container());
        let remote = self.address(&entry, dir, ResolveOptions::remote(false));

        let raw = self
            .rclone
            .post("operations/list", json!({ "fs": fs, "remote": remote }))
            .await?;
        let listing: RcloneListResponse = serde_json::from_value(raw)?;

        Ok(listing
            .list
            .into_iter()
            .map(|item| FileEntry {
                storage_name: entry.name.clone(),
                path: entry.backend.logical_child_path(&entry.name, &item.path),
                name: item.name,
                size: item.size,
                mime_type: item.mime_type,
                mod_time: item.mod_time,
                is_dir: item.is_dir,
            })
            .collect())
    }

    pub async fn make_dir(&self, storage: &str, path: &str) -> Result<()> {
        let (fs, remote) = self.split(storage, path, false)?;
        self.rclone
            .post("operations/mkdir", json!({ "fs": fs, "remote": remote }))
            .await?;
        Ok(())
    }

    async fn transfer_file(
        &self,
        kind: Transfer,
        src_storage: &str,
        src_path: &str,
        dst_storage: &str,
        dst_path: &str,
        dest_is_exact_file: bool,
    ) -> Result<()> {
        let (src_fs, src_remote) = self.split(src_storage, src_path, false)?;
        let dst_path = if dest_is_exact_file {
            dst_path.to_string()
        } else {
            path::join(dst_path, path::basename(src_path))
        };
        let (dst_fs, dst_remote) = self.split(dst_storage, &dst_path, false)?;

        tracing::debug!(?kind, %src_fs, %src_remote, %dst_fs, %dst_remote, "file transfer");
        self.rclone
            .post(
                kind.file_endpoint(),
                json!({
                    "srcFs": src_fs,
                    "srcRemote": src_remote,
                    "dstFs": dst_fs,
                    "dstRemote": dst_remote,
                }),
            )
            .await?;
        Ok(())
    }

    async fn transfer_dir(
        &self,
        kind: Transfer,
        src_storage: &str,
        src_path: &str,
        dst_storage: &str,
        dst_path: &str,
        rename: Option<&str>,
    ) -> Result<()> {
        let src_entry = self.entry(src_storage)?;
        let dst_entry = self.entry(dst_storage)?;

        let child = rename.unwrap_or_else(|| path::basename(src_path));
        let src_fs = self.address(&src_entry, src_path, ResolveOptions::dir());
        let dst_fs = self.address(&dst_entry, &path::join(dst_path, child), ResolveOptions::dir());

        tracing::debug!(?kind, %src_fs, %dst_fs, "directory transfer");
        match kind {
            Transfer::Copy => {
                self.rclone
                    .post("sync/copy", json!({ "srcFs": src_fs, "dstFs": dst_fs }))
                    .await?
            }
            Transfer::Move => {
                self.rclone
                    .post(
                        "sync/move",
                        json!({ "srcFs": src_fs, "dstFs": dst_fs, "deleteEmptySrcDirs": true }),
                    )
                    .await?
            }
        };
        Ok(())
    }

    /// Streams one local file into the directory `dir` of `storage`.
    pub async fn upload(
        &self,
        storage: &str,
        dir: &str,
        local_path: &Path,
        on_progress: ProgressFn,
    ) -> Result<()> {
        let (fs, remote) = self.split(storage, dir, false)?;
        self.rclone
            .upload_file(&fs, &remote, local_path, on_progress)
            .await?;
        Ok(())
    }

    /// Uploads every file below `local_dir`, keeping its relative layout under `dir`.
    ///
    /// Progress is reported per file with the file's own byte counts.
    pub async fn upload_dir(
        &self,
        storage: &str,
        dir: &str,
        local_dir: &Path,
        on_progress: ProgressFn,
    ) -> Result<usize> {
        self.entry(storage)?;
        let root = local_dir
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();

        let mut files: Vec<(PathBuf, String)> = Vec::new();
        for entry in WalkDir::new(local_dir).into_iter() {
            let entry = entry.map_err(|err| CoreError::Io(err.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative_parent = entry
                .path()
                .parent()
                .and_then(|parent| parent.strip_prefix(local_dir).ok())
                .map(|parent| parent.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            let target = path::join(&path::join(dir, &root), &relative_parent);
            files.push((entry.into_path(), target));
        }

        for (local, target) in &files {
            self.upload(storage, target, local, on_progress.clone()).await?;
        }
        tracing::info!(storage, files = files.len(), "directory uploaded");
        Ok(files.len())
    }
}

#[async_trait]
impl FileOperations for OperationExecutor {
    async fn delete_file(&self, storage: &str, path: &str) -> Result<()> {
        let (fs, remote) = self.split(storage, path, false)?;
        self.rclone
            .post("operations/deletefile", json!({ "fs": fs, "remote": remote }))
            .await?;
        Ok(())
    }

    async fn delete_dir(&self, storage: &str, path: &str) -> Result<()> {
        let (fs, remote) = self.split(storage, path, false)?;
        self.rclone
            .post("operations/purge", json!({ "fs": fs, "remote": remote }))
            .await?;
        Ok(())
    }

    async fn copy_file(
        &self,
        src_storage: &str,
        src_path: &str,
        dst_storage: &str,
        dst_path: &str,
        dest_is_exact_file: bool,
    ) -> Result<()> {
        self.transfer_file(
            Transfer::Copy,
            src_storage,
            src_path,
            dst_storage,
            dst_path,
            dest_is_exact_file,
        )
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
        self.transfer_file(
            Transfer::Move,
            src_storage,
            src_path,
            dst_storage,
            dst_path,
            dest_is_exact_file,
        )
        .await
    }

    async fn copy_dir(
        &self,
        src_storage: &str,
        src_path: &str,
        dst_storage: &str,
        dst_path: &str,
        rename: Option<&str>,
    ) -> Result<()> {
        self.transfer_dir(Transfer::Copy, src_storage, src_path, dst_storage, dst_path, rename)
            .await
    }

    async fn move_dir(
        &self,
        src_storage: &str,
        src_path: &str,
        dst_storage: &str,
        dst_path: &str,
        rename: Option<&str>,
    ) -> Result<()> {
        self.transfer_dir(Transfer::Move, src_storage, src_path, dst_storage, dst_path, rename)
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
        let src_entry = self.entry(src_storage)?;
        let dst_entry = self.entry(dst_storage)?;
        let src_fs = self.address(&src_entry, src_path, ResolveOptions::dir());
        let dst_fs = self.address(&dst_entry, dst_path, ResolveOptions::dir());

        let (endpoint, body): (&str, Value) = if bidirectional {
            ("sync/bisync", json!({ "path1": src_fs, "path2": dst_fs }))
        } else {
            ("sync/sync", json!({ "srcFs": src_fs, "dstFs": dst_fs }))
        };
        tracing::debug!(endpoint, "sync");
        self.rclone.post(endpoint, body).await?;
        Ok(())
    }
}
