//! Executes one task definition and folds the outcome into its run info.

use crate::{
    error::{CoreError, Result},
    operations::FileOperations,
    path::is_dir_path,
    task::{RunMode, RunState, TaskDefinition, TaskType},
};

/// Runs `task` once. Never fails: errors land in `run_info` instead.
///
/// A disabled task comes back untouched. A `disposable` task is disabled after the
/// attempt whatever its outcome.
pub async fn run_task(ops: &dyn FileOperations, mut task: TaskDefinition) -> TaskDefinition {
    if !task.enable {
        tracing::debug!(task = %task.name, "task disabled, skipping");
        return task;
    }

    task.run_info.state = RunState::Running;
    tracing::info!(task = %task.name, task_type = %task.task_type, "task started");

    match dispatch(ops, &task).await {
        Ok(summary) => {
            tracing::info!(task = %task.name, "task succeeded");
            task.run_info.record(RunState::Succeeded, summary);
        }
        Err(err) => {
            tracing::error!(task = %task.name, error = %err, "task failed");
            task.run_info.record(RunState::Failed, err.to_string());
        }
    }

    if matches!(task.run_mode(), Ok(RunMode::Disposable)) {
        task.enable = false;
    }
    task
}

async fn dispatch(ops: &dyn FileOperations, task: &TaskDefinition) -> Result<String> {
    let kind = task.kind()?;
    let src = &task.source;
    let dst = &task.target;
    let src_dir = is_dir_path(&src.path);
    let dst_dir = is_dir_path(&dst.path);

    match kind {
        TaskType::Copy | TaskType::Move => {
            let moving = kind == TaskType::Move;
            match (src_dir, dst_dir) {
                (true, true) if moving => {
                    ops.move_dir(&src.storage_name, &src.path, &dst.storage_name, &dst.path, None)
                        .await?
                }
                (true, true) => {
                    ops.copy_dir(&src.storage_name, &src.path, &dst.storage_name, &dst.path, None)
                        .await?
                }
                (false, target_is_dir) => {
                    let exact = !target_is_dir;
                    if moving {
                        ops.move_file(&src.storage_name, &src.path, &dst.storage_name, &dst.path, exact)
                            .await?
                    } else {
                        ops.copy_file(&src.storage_name, &src.path, &dst.storage_name, &dst.path, exact)
                            .await?
                    }
                }
                (true, false) => {
                    return Err(CoreError::InvalidOperation(format!(
                        "Cannot {} directory {} into file {}",
                        task.task_type, src.path, dst.path
                    )))
                }
            }
            Ok(format!(
                "{} {}:{} -> {}:{}",
                task.task_type, src.storage_name, src.path, dst.storage_name, dst.path
            ))
        }
        TaskType::Delete => {
            if src_dir {
                ops.delete_dir(&src.storage_name, &src.path).await?;
            } else {
                ops.delete_file(&src.storage_name, &src.path).await?;
            }
            Ok(format!("delete {}:{}", src.storage_name, src.path))
        }
        TaskType::Sync | TaskType::Bisync => {
            let bidirectional = kind == TaskType::Bisync;
            ops.sync(&src.storage_name, &src.path, &dst.storage_name, &dst.path, bidirectional)
                .await?;
            Ok(format!(
                "{} {}:{} <-> {}:{}",
                task.task_type, src.storage_name, src.path, dst.storage_name, dst.path
            ))
        }
    }
}
