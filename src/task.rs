use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::{
    config::ConfigStore,
    error::{CoreError, Result},
    lock, now_iso,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskType {
    Copy,
    Move,
    Delete,
    Sync,
    Bisync,
}

impl TaskType {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "copy" => Ok(Self::Copy),
            "move" => Ok(Self::Move),
            "delete" => Ok(Self::Delete),
            "sync" => Ok(Self::Sync),
            "bisync" => Ok(Self::Bisync),
            other => Err(CoreError::InvalidTaskType(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// Runs once when the scheduler picks the task up.
    Start,
    /// Runs once, then the definition is deleted.
    Disposable,
    /// Wall-clock time of day, every `intervalDays`.
    Time,
    /// Fixed period in milliseconds.
    Interval,
}

impl RunMode {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "start" => Ok(Self::Start),
            "disposable" => Ok(Self::Disposable),
            "time" => Ok(Self::Time),
            "interval" => Ok(Self::Interval),
            other => Err(CoreError::InvalidRunMode(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskLocation {
    pub storage_name: String,
    pub path: String,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeOfDay {
    pub interval_days: u32,
    pub h: u32,
    pub m: u32,
    pub s: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    pub mode: String,
    #[serde(default)]
    pub time: TimeOfDay,
    /// Period for `interval` mode, in milliseconds.
    #[serde(default)]
    pub interval: u64,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunMessage {
    pub at: String,
    pub text: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RunInfo {
    pub error: bool,
    pub state: RunState,
    pub messages: Vec<RunMessage>,
}

impl RunInfo {
    pub fn record(&mut self, state: RunState, text: impl Into<String>) {
        self.error = state == RunState::Failed;
        self.state = state;
        self.messages.push(RunMessage {
            at: now_iso(),
            text: text.into(),
        });
    }

    pub fn last_message(&self) -> Option<&str> {
        self.messages.last().map(|message| message.text.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub name: String,
    pub task_type: String,
    pub source: TaskLocation,
    #[serde(default)]
    pub target: TaskLocation,
    pub run: RunConfig,
    pub enable: bool,
    #[serde(default)]
    pub run_info: RunInfo,
}

impl TaskDefinition {
    pub fn kind(&self) -> Result<TaskType> {
        TaskType::parse(&self.task_type)
    }

    pub fn run_mode(&self) -> Result<RunMode> {
        RunMode::parse(&self.run.mode)
    }
}

/// Persisted task definitions, written through on every mutation.
pub struct TaskStore {
    tasks: Mutex<Vec<TaskDefinition>>,
    config: Arc<dyn ConfigStore>,
}

impl TaskStore {
    pub fn load(config: Arc<dyn ConfigStore>) -> Result<Self> {
        let tasks = config.load_tasks()?;
        Ok(Self {
            tasks: Mutex::new(tasks),
            config,
        })
    }

    pub fn list(&self) -> Result<Vec<TaskDefinition>> {
        Ok(lock(&self.tasks)?.clone())
    }

    pub fn get(&self, name: &str) -> Result<Option<TaskDefinition>> {
        Ok(lock(&self.tasks)?.iter().find(|task| task.name == name).cloned())
    }

    /// Persists `next` and only then makes it the in-memory list.
    fn commit(&self, tasks: &mut Vec<TaskDefinition>, next: Vec<TaskDefinition>) -> Result<()> {
        self.config.save_tasks(&next)?;
        *tasks = next;
        Ok(())
    }

    /// Inserts or replaces the definition with the same name.
    pub fn save_task(&self, task: TaskDefinition) -> Result<()> {
        if task.name.trim().is_empty() {
            return Err(CoreError::InvalidOperation(
                "Task name cannot be empty".to_string(),
            ));
        }

        let mut tasks = lock(&self.tasks)?;
        let mut next = tasks.clone();
        if let Some(existing) = next.iter_mut().find(|existing| existing.name == task.name) {
            *existing = task;
        } else {
            next.push(task);
        }
        self.commit(&mut tasks, next)
    }

    pub fn delete_task(&self, name: &str) -> Result<bool> {
        let mut tasks = lock(&self.tasks)?;
        if !tasks.iter().any(|task| task.name == name) {
            return Ok(false);
        }
        let next = tasks.iter().filter(|task| task.name != name).cloned().collect();
        self.commit(&mut tasks, next)?;
        Ok(true)
    }

    pub fn rename_task(&self, old_name: &str, new_name: &str) -> Result<TaskDefinition> {
        if new_name.trim().is_empty() {
            return Err(CoreError::InvalidOperation(
                "Task name cannot be empty".to_string(),
            ));
        }

        let mut tasks = lock(&self.tasks)?;
        if old_name != new_name && tasks.iter().any(|task| task.name == new_name) {
            return Err(CoreError::InvalidOperation(format!(
                "Task already exists: {new_name}"
            )));
        }
        let mut next = tasks.clone();
        let Some(task) = next.iter_mut().find(|task| task.name == old_name) else {
            return Err(CoreError::TaskNotFound(old_name.to_string()));
        };
        task.name = new_name.to_string();
        let renamed = task.clone();
        self.commit(&mut tasks, next)?;
        Ok(renamed)
    }

    /// Stores the outcome of an execution on the persisted definition, if it still exists.
    pub fn record_run(&self, executed: &TaskDefinition) -> Result<()> {
        let mut tasks = lock(&self.tasks)?;
        let mut next = tasks.clone();
        let Some(task) = next.iter_mut().find(|task| task.name == executed.name) else {
            return Ok(());
        };
        task.enable = executed.enable;
        task.run_info = executed.run_info.clone();
        self.commit(&mut tasks, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{task, MemoryConfigStore};

    #[test]
    fn parses_persisted_definition() {
        let raw = r#"{
            "name": "nightly",
            "taskType": "copy",
            "source": {"storageName": "S3", "path": "/photos/"},
            "target": {"storageName": "gdrive", "path": "/backup/"},
            "enable": true,
            "run": {"mode": "time", "time": {"intervalDays": 1, "h": 8, "m": 0, "s": 0}}
        }"#;
        let task: TaskDefinition = serde_json::from_str(raw).unwrap();
        assert_eq!(task.kind().unwrap(), TaskType::Copy);
        assert_eq!(task.run_mode().unwrap(), RunMode::Time);
        assert_eq!(task.run.time.h, 8);
        assert_eq!(task.run.interval, 0);
        assert_eq!(task.run_info, RunInfo::default());
    }

    #[test]
    fn unknown_tags_are_reported() {
        assert!(matches!(
            TaskType::parse("mirror"),
            Err(CoreError::InvalidTaskType(value)) if value == "mirror"
        ));
        assert!(matches!(
            RunMode::parse("hourly"),
            Err(CoreError::InvalidRunMode(_))
        ));
    }

    #[test]
    fn save_replaces_by_name_and_persists() {
        let config = Arc::new(MemoryConfigStore::default());
        let store = TaskStore::load(config.clone()).unwrap();

        store.save_task(task("a", "copy", "start")).unwrap();
        let mut updated = task("a", "move", "start");
        updated.enable = false;
        store.save_task(updated).unwrap();
        store.save_task(task("b", "delete", "start")).unwrap();

        let persisted = config.tasks();
        assert_eq!(persisted.len(), 2);
        assert_eq!(persisted[0].task_type, "move");
        assert!(!persisted[0].enable);
    }

    #[test]
    fn rename_rejects_collisions() {
        let config = Arc::new(MemoryConfigStore::default());
        let store = TaskStore::load(config.clone()).unwrap();
        store.save_task(task("a", "copy", "start")).unwrap();
        store.save_task(task("b", "copy", "start")).unwrap();

        assert!(matches!(
            store.rename_task("a", "b"),
            Err(CoreError::InvalidOperation(_))
        ));
        assert!(matches!(
            store.rename_task("missing", "c"),
            Err(CoreError::TaskNotFound(_))
        ));

        store.rename_task("a", "c").unwrap();
        let names: Vec<_> = config.tasks().into_iter().map(|task| task.name).collect();
        assert_eq!(names, vec!["c", "b"]);
    }

    #[test]
    fn failed_write_leaves_memory_untouched() {
        let config = Arc::new(MemoryConfigStore::default());
        let store = TaskStore::load(config.clone()).unwrap();
        store.save_task(task("a", "copy", "start")).unwrap();
        config.fail_writes(true);

        assert!(store.save_task(task("b", "copy", "start")).is_err());
        assert!(store.delete_task("a").is_err());
        assert!(store.rename_task("a", "c").is_err());
        let mut executed = task("a", "copy", "start");
        executed.run_info.record(RunState::Failed, "boom");
        assert!(store.record_run(&executed).is_err());

        let names: Vec<_> = store.list().unwrap().into_iter().map(|task| task.name).collect();
        assert_eq!(names, vec!["a"]);
        assert_eq!(store.get("a").unwrap().unwrap().run_info, RunInfo::default());
        assert_eq!(config.tasks().len(), 1);
    }

    #[test]
    fn record_run_ignores_deleted_definitions() {
        let config = Arc::new(MemoryConfigStore::default());
        let store = TaskStore::load(config.clone()).unwrap();
        let mut executed = task("gone", "copy", "start");
        executed.run_info.record(RunState::Failed, "boom");

        store.record_run(&executed).unwrap();
        assert!(config.tasks().is_empty());
    }
}
