//! String-method command surface for a presentation layer.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::{path::PathBuf, sync::Arc};

use crate::{
    error::{CoreError, Result},
    mounts::MountConfig,
    operations::FileOperations,
    path::is_dir_path,
    rclone::ProgressFn,
    task::TaskDefinition,
    NetCore,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorageNameInput {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorageCreateInput {
    name: String,
    #[serde(rename = "type")]
    storage_type: String,
    parameters: Option<Map<String, Value>>,
    required: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilesListInput {
    storage_name: String,
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilePathInput {
    storage_name: String,
    path: String,
    is_dir: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferInput {
    src_storage: String,
    src_path: String,
    dst_storage: String,
    dst_path: String,
    is_dir: Option<bool>,
    exact: Option<bool>,
    rename: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncInput {
    src_storage: String,
    src_path: String,
    dst_storage: String,
    dst_path: String,
    bidirectional: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadInput {
    storage_name: String,
    path: String,
    local_path: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskNameInput {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskRenameInput {
    old_name: String,
    new_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MountInput {
    storage_name: String,
    mount_path: String,
    parameters: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MountPathInput {
    mount_path: String,
}

fn payload_or_null(payload: Option<Value>) -> Value {
    payload.unwrap_or(Value::Null)
}

fn parse_payload<T>(payload: Value) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(payload)
        .map_err(|err| CoreError::InvalidOperation(format!("Invalid payload: {err}")))
}

fn upload_progress(path: String) -> ProgressFn {
    Arc::new(move |sent, total| {
        tracing::trace!(path = %path, sent, total, "upload progress");
    })
}

/// Dispatches one command; errors come back as display strings.
pub async fn rpc_request(
    core: &NetCore,
    method: &str,
    payload: Option<Value>,
) -> Result<Value, String> {
    dispatch(core, method, payload_or_null(payload))
        .await
        .map_err(|err| {
            tracing::debug!(method, error = %err, "rpc request failed");
            err.to_string()
        })
}

async fn dispatch(core: &NetCore, method: &str, payload: Value) -> Result<Value> {
    match method {
        "storage:list" => Ok(serde_json::to_value(core.directory().visible())?),
        "storage:refresh" => {
            core.refresh().await?;
            Ok(serde_json::to_value(core.directory().visible())?)
        }
        "storage:get-params" => {
            let input: StorageNameInput = parse_payload(payload)?;
            core.storage_params(&input.name).await
        }
        "storage:create" => {
            let input: StorageCreateInput = parse_payload(payload)?;
            core.create_storage(
                &input.name,
                &input.storage_type,
                &input.parameters.unwrap_or_default(),
                &input.required.unwrap_or_default(),
            )
            .await?;
            Ok(json!({ "success": true }))
        }
        "storage:delete" => {
            let input: StorageNameInput = parse_payload(payload)?;
            core.delete_storage(&input.name).await?;
            Ok(json!({ "success": true }))
        }

        "transfer:stats" => core.transfer_stats().await,

        "files:list" => {
            let input: FilesListInput = parse_payload(payload)?;
            let path = input.path.unwrap_or_else(|| "/".to_string());
            let entries = core.executor().list(&input.storage_name, &path).await?;
            Ok(serde_json::to_value(entries)?)
        }
        "files:mkdir" => {
            let input: FilePathInput = parse_payload(payload)?;
            core.executor()
                .make_dir(&input.storage_name, &input.path)
                .await?;
            Ok(json!({ "success": true }))
        }
        "files:delete" => {
            let input: FilePathInput = parse_payload(payload)?;
            let executor = core.executor();
            if input.is_dir.unwrap_or_else(|| is_dir_path(&input.path)) {
                executor.delete_dir(&input.storage_name, &input.path).await?;
            } else {
                executor.delete_file(&input.storage_name, &input.path).await?;
            }
            Ok(json!({ "success": true }))
        }
        "files:copy" | "files:move" => {
            let input: TransferInput = parse_payload(payload)?;
            let executor = core.executor();
            let moving = method == "files:move";
            let is_dir = input.is_dir.unwrap_or_else(|| is_dir_path(&input.src_path));

            match (is_dir, moving) {
                (true, false) => {
                    executor
                        .copy_dir(
                            &input.src_storage,
                            &input.src_path,
                            &input.dst_storage,
                            &input.dst_path,
                            input.rename.as_deref(),
                        )
                        .await?
                }
                (true, true) => {
                    executor
                        .move_dir(
                            &input.src_storage,
                            &input.src_path,
                            &input.dst_storage,
                            &input.dst_path,
                            input.rename.as_deref(),
                        )
                        .await?
                }
                (false, false) => {
                    executor
                        .copy_file(
                            &input.src_storage,
                            &input.src_path,
                            &input.dst_storage,
                            &input.dst_path,
                            input.exact.unwrap_or(false),
                        )
                        .await?
                }
                (false, true) => {
                    executor
                        .move_file(
                            &input.src_storage,
                            &input.src_path,
                            &input.dst_storage,
                            &input.dst_path,
                            input.exact.unwrap_or(false),
                        )
                        .await?
                }
            }
            Ok(json!({ "success": true }))
        }
        "files:sync" => {
            let input: SyncInput = parse_payload(payload)?;
            core.executor()
                .sync(
                    &input.src_storage,
                    &input.src_path,
                    &input.dst_storage,
                    &input.dst_path,
                    input.bidirectional.unwrap_or(false),
                )
                .await?;
            Ok(json!({ "success": true }))
        }
        "files:upload" => {
            let input: UploadInput = parse_payload(payload)?;
            let progress = upload_progress(input.path.clone());
            core.executor()
                .upload(&input.storage_name, &input.path, &input.local_path, progress)
                .await?;
            Ok(json!({ "success": true }))
        }
        "files:upload-dir" => {
            let input: UploadInput = parse_payload(payload)?;
            let progress = upload_progress(input.path.clone());
            let files = core
                .executor()
                .upload_dir(&input.storage_name, &input.path, &input.local_path, progress)
                .await?;
            Ok(json!({ "success": true, "files": files }))
        }

        "task:list" => Ok(serde_json::to_value(core.tasks().list()?)?),
        "task:save" => {
            let task: TaskDefinition = parse_payload(payload)?;
            core.save_task(task)?;
            Ok(json!({ "success": true }))
        }
        "task:delete" => {
            let input: TaskNameInput = parse_payload(payload)?;
            let deleted = core.delete_task(&input.name)?;
            Ok(json!({ "success": deleted }))
        }
        "task:rename" => {
            let input: TaskRenameInput = parse_payload(payload)?;
            let task = core.rename_task(&input.old_name, &input.new_name)?;
            Ok(serde_json::to_value(task)?)
        }
        "task:run-now" => {
            let input: TaskNameInput = parse_payload(payload)?;
            let task = core.run_task_now(&input.name).await?;
            Ok(serde_json::to_value(task)?)
        }
        "task:live" => Ok(json!(core.scheduler().live_tasks()?)),
        "task:status" => {
            let input: TaskNameInput = parse_payload(payload)?;
            let scheduler = core.scheduler();
            Ok(json!({
                "armed": scheduler.is_armed(&input.name)?,
                "running": scheduler.is_running(&input.name)?,
            }))
        }

        "mount:list" => Ok(json!({
            "mounted": core.mounts().mounted()?,
            "configured": core.mounts().configured()?,
        })),
        "mount:refresh" => Ok(serde_json::to_value(
            core.mounts().refresh_mounts().await?,
        )?),
        "mount:mount" => {
            let input: MountInput = parse_payload(payload)?;
            core.mounts()
                .mount(
                    &input.storage_name,
                    &input.mount_path,
                    &input.parameters.unwrap_or_default(),
                )
                .await?;
            Ok(json!({ "success": true }))
        }
        "mount:unmount" => {
            let input: MountPathInput = parse_payload(payload)?;
            core.mounts().unmount(&input.mount_path).await?;
            Ok(json!({ "success": true }))
        }
        "mount:is-mounted" => {
            let input: MountPathInput = parse_payload(payload)?;
            Ok(json!({ "mounted": core.mounts().is_mounted(&input.mount_path)? }))
        }
        "mount:save-config" => {
            let mount: MountConfig = parse_payload(payload)?;
            core.mounts().save_mount_config(mount)?;
            Ok(json!({ "success": true }))
        }
        "mount:delete-config" => {
            let input: MountPathInput = parse_payload(payload)?;
            let deleted = core.mounts().delete_mount_config(&input.mount_path)?;
            Ok(json!({ "success": deleted }))
        }

        _ => Err(CoreError::UnsupportedCapability(format!(
            "RPC method not implemented: {method}"
        ))),
    }
}
