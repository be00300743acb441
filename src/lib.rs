use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex, MutexGuard};

pub mod config;
pub mod config_paths;
pub mod error;
pub mod logging;
pub mod mounts;
pub mod openlist;
pub mod operations;
pub mod path;
pub mod rclone;
pub mod resolver;
pub mod rpc;
pub mod runner;
pub mod scheduler;
pub mod storage;
pub mod task;

#[cfg(test)]
mod testing;

use config::{AppSettings, ConfigStore, JsonConfigStore};
use error::{CoreError, Result};
use mounts::MountManager;
use openlist::{OpenlistApi, OpenlistClient};
use operations::OperationExecutor;
use rclone::{RcloneApi, RcloneClient};
use scheduler::TaskScheduler;
use storage::StorageDirectory;
use task::{TaskDefinition, TaskStore};

pub use rpc::rpc_request;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| CoreError::StatePoisoned)
}

pub(crate) fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Everything a presentation layer talks to, wired to one pair of backends.
pub struct NetCore {
    directory: StorageDirectory,
    rclone: Arc<dyn RcloneApi>,
    openlist: Option<Arc<dyn OpenlistApi>>,
    executor: Arc<OperationExecutor>,
    tasks: Arc<TaskStore>,
    scheduler: Arc<TaskScheduler>,
    mounts: MountManager,
}

impl NetCore {
    pub fn new(
        bridge: &str,
        rclone: Arc<dyn RcloneApi>,
        openlist: Option<Arc<dyn OpenlistApi>>,
        config: Arc<dyn ConfigStore>,
    ) -> Result<Self> {
        let directory = StorageDirectory::new(bridge);
        let executor = Arc::new(OperationExecutor::new(directory.clone(), rclone.clone()));
        let tasks = Arc::new(TaskStore::load(config.clone())?);
        let scheduler = TaskScheduler::new(tasks.clone(), executor.clone());
        let mounts = MountManager::load(directory.clone(), rclone.clone(), config)?;

        Ok(Self {
            directory,
            rclone,
            openlist,
            executor,
            tasks,
            scheduler,
            mounts,
        })
    }

    /// Builds HTTP clients and the JSON config store from `settings`.
    pub fn from_settings(settings: &AppSettings) -> Result<Self> {
        let rclone: Arc<dyn RcloneApi> = Arc::new(RcloneClient::new(&settings.rclone)?);
        let openlist = match &settings.openlist {
            Some(endpoint) => Some(Arc::new(OpenlistClient::new(endpoint)?) as Arc<dyn OpenlistApi>),
            None => None,
        };
        let config: Arc<dyn ConfigStore> = Arc::new(JsonConfigStore::open_default()?);
        Self::new(&settings.bridge_remote, rclone, openlist, config)
    }

    pub fn directory(&self) -> &StorageDirectory {
        &self.directory
    }

    pub fn executor(&self) -> &OperationExecutor {
        &self.executor
    }

    pub fn tasks(&self) -> &TaskStore {
        &self.tasks
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn mounts(&self) -> &MountManager {
        &self.mounts
    }

    pub async fn refresh(&self) -> Result<()> {
        self.directory
            .refresh(self.rclone.as_ref(), self.openlist.as_deref())
            .await
    }

    pub async fn storage_params(&self, name: &str) -> Result<Value> {
        self.directory
            .storage_params(name, self.rclone.as_ref(), self.openlist.as_deref())
            .await
    }

    pub async fn create_storage(
        &self,
        name: &str,
        storage_type: &str,
        parameters: &Map<String, Value>,
        required: &[String],
    ) -> Result<()> {
        self.directory
            .create_storage(
                name,
                storage_type,
                parameters,
                required,
                self.rclone.as_ref(),
                self.openlist.as_deref(),
            )
            .await
    }

    pub async fn delete_storage(&self, name: &str) -> Result<()> {
        self.directory
            .delete_storage(name, self.rclone.as_ref(), self.openlist.as_deref())
            .await
    }

    /// Live transfer counters of backend R.
    pub async fn transfer_stats(&self) -> Result<Value> {
        self.rclone.post("core/stats", json!({})).await
    }

    /// Persists `task`, then (re)arms it.
    pub fn save_task(&self, task: TaskDefinition) -> Result<()> {
        task.kind()?;
        self.tasks.save_task(task.clone())?;
        self.scheduler.add_task(&task)
    }

    /// Cancels the task's timer before removing its definition.
    pub fn delete_task(&self, name: &str) -> Result<bool> {
        self.scheduler.cancel_task(name)?;
        self.tasks.delete_task(name)
    }

    /// Moves the timer only once the stored definition has been renamed.
    pub fn rename_task(&self, old_name: &str, new_name: &str) -> Result<TaskDefinition> {
        let renamed = self.tasks.rename_task(old_name, new_name)?;
        self.scheduler.cancel_task(old_name)?;
        self.scheduler.add_task(&renamed)?;
        Ok(renamed)
    }

    pub async fn run_task_now(&self, name: &str) -> Result<TaskDefinition> {
        self.scheduler.run_now(name).await
    }

    /// Loads storages and mounts, auto-mounts, then arms every stored task.
    ///
    /// Backend failures are logged so the scheduler still starts against an offline backend.
    pub async fn start(&self) -> Result<()> {
        if let Err(err) = self.refresh().await {
            tracing::warn!(error = %err, "initial storage refresh failed");
        }
        if let Err(err) = self.mounts.refresh_mounts().await {
            tracing::warn!(error = %err, "initial mount refresh failed");
        }
        match self.mounts.auto_mount().await {
            Ok(mounted) => tracing::info!(mounted, "auto mount finished"),
            Err(err) => tracing::warn!(error = %err, "auto mount failed"),
        }
        self.scheduler.start()
    }

    pub fn shutdown(&self) -> Result<()> {
        self.scheduler.shutdown()
    }
}

async fn serve() -> Result<()> {
    let settings = AppSettings::load()?;
    let core = NetCore::from_settings(&settings)?;
    core.start().await?;

    tracing::info!(rclone = %settings.rclone.url, "mountdeck running");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    core.shutdown()
}

pub fn run() {
    let filter = AppSettings::load()
        .map(|settings| settings.log_filter)
        .unwrap_or_else(|_| AppSettings::default().log_filter);
    let _logging = logging::init(&filter);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error while starting runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(serve()) {
        tracing::error!(error = %err, "mountdeck stopped");
        eprintln!("error while running mountdeck: {err}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{task, MemoryConfigStore, MockRclone, BRIDGE};

    #[tokio::test(start_paused = true)]
    async fn start_arms_persisted_tasks_even_when_backend_is_down() {
        let rclone = Arc::new(MockRclone::default());
        rclone.fail("config/dump", "connection refused");
        let mut tick = task("tick", "sync", "interval");
        tick.run.interval = 1_000;
        let config = Arc::new(MemoryConfigStore::with_tasks(vec![tick]));

        let core = NetCore::new(BRIDGE, rclone, None, config).unwrap();
        core.start().await.unwrap();
        assert!(core.scheduler().is_armed("tick").unwrap());

        core.shutdown().unwrap();
        assert!(!core.scheduler().is_armed("tick").unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_rename_keeps_the_task_armed() {
        let rclone = Arc::new(MockRclone::default());
        let mut a = task("a", "sync", "interval");
        a.run.interval = 1_000;
        let mut b = task("b", "sync", "interval");
        b.run.interval = 1_000;
        let config = Arc::new(MemoryConfigStore::with_tasks(vec![a, b]));
        let core = NetCore::new(BRIDGE, rclone, None, config).unwrap();
        core.start().await.unwrap();

        assert!(matches!(
            core.rename_task("a", "b"),
            Err(CoreError::InvalidOperation(_))
        ));
        assert!(matches!(
            core.rename_task("missing", "c"),
            Err(CoreError::TaskNotFound(_))
        ));
        assert_eq!(core.scheduler().live_tasks().unwrap(), vec!["a", "b"]);

        core.rename_task("a", "c").unwrap();
        assert_eq!(core.scheduler().live_tasks().unwrap(), vec!["b", "c"]);
        core.shutdown().unwrap();
    }

    #[tokio::test]
    async fn save_rejects_unknown_task_type() {
        let rclone = Arc::new(MockRclone::default());
        rclone.respond("config/dump", json!({}));
        let config = Arc::new(MemoryConfigStore::default());
        let core = NetCore::new(BRIDGE, rclone, None, config.clone()).unwrap();

        assert!(matches!(
            core.save_task(task("bad", "mirror", "start")),
            Err(CoreError::InvalidTaskType(_))
        ));
        assert!(config.tasks().is_empty());
    }
}
