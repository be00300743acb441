//! Timer ownership for task definitions.
//!
//! Every armed task has exactly one timer in the scheduler's map. Timers never run a task
//! themselves: they post a `Fire` carrying their id to the driver loop, which drops stale
//! fires, applies the skip-if-running overlap policy and spawns the execution. The
//! execution posts `Finished` back so the driver can persist the outcome and, for
//! time-of-day tasks, arm the next single-shot timer.
//!
//! A timer carries the definition it was armed with. The persisted definition wins when one
//! exists, so run info recorded between fires is not lost.

use chrono::{Days, Local, NaiveDateTime, NaiveTime};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use uuid::Uuid;

use crate::{
    error::{CoreError, Result},
    lock,
    operations::FileOperations,
    runner::run_task,
    task::{RunMode, TaskDefinition, TaskStore, TimeOfDay},
};

/// Broadcast to subscribers as tasks move through the scheduler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskEvent {
    Started { name: String },
    Finished { name: String, error: bool },
    /// A fire arrived while the previous execution was still running.
    Skipped { name: String },
    /// A disposable task deleted itself after running.
    Removed { name: String },
}

enum Command {
    Fire { name: String, timer_id: Uuid },
    Finished { task: TaskDefinition, timer_id: Uuid },
    Shutdown,
}

struct TimerHandle {
    id: Uuid,
    task: TaskDefinition,
    handle: JoinHandle<()>,
}

pub struct TaskScheduler {
    store: Arc<TaskStore>,
    ops: Arc<dyn FileOperations>,
    timers: Mutex<HashMap<String, TimerHandle>>,
    running: Mutex<HashSet<String>>,
    /// One-shot fires that arrived while the task was running, keyed by task name.
    deferred: Mutex<HashMap<String, Uuid>>,
    commands: mpsc::UnboundedSender<Command>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    events: broadcast::Sender<TaskEvent>,
}

/// Next wall-clock occurrence of `time` strictly after `now`.
///
/// The candidate is `intervalDays` after today at `h:m:s`; one more day is added when that
/// is not in the future.
pub fn next_fire(now: NaiveDateTime, time: &TimeOfDay) -> Result<NaiveDateTime> {
    let at = NaiveTime::from_hms_opt(time.h, time.m, time.s).ok_or_else(|| {
        CoreError::InvalidRunMode(format!("time {}:{}:{}", time.h, time.m, time.s))
    })?;
    let overflow = || CoreError::InvalidRunMode(format!("interval of {} days", time.interval_days));

    let candidate = now
        .date()
        .checked_add_days(Days::new(u64::from(time.interval_days)))
        .ok_or_else(overflow)?
        .and_time(at);
    if candidate > now {
        Ok(candidate)
    } else {
        candidate.checked_add_days(Days::new(1)).ok_or_else(overflow)
    }
}

impl TaskScheduler {
    pub fn new(store: Arc<TaskStore>, ops: Arc<dyn FileOperations>) -> Arc<Self> {
        let (commands, inbox) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            store,
            ops,
            timers: Mutex::new(HashMap::new()),
            running: Mutex::new(HashSet::new()),
            deferred: Mutex::new(HashMap::new()),
            commands,
            inbox: Mutex::new(Some(inbox)),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Spawns the driver loop and arms every persisted task.
    ///
    /// Tasks with an invalid run configuration are logged and left unarmed.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let Some(inbox) = lock(&self.inbox)?.take() else {
            return Err(CoreError::InvalidOperation(
                "Scheduler already started".to_string(),
            ));
        };
        tokio::spawn(Arc::clone(self).drive(inbox));

        let tasks = self.store.list()?;
        for task in &tasks {
            if let Err(err) = self.add_task(task) {
                tracing::error!(task = %task.name, error = %err, "task not armed");
            }
        }
        let armed = lock(&self.timers)?.len();
        tracing::info!(tasks = tasks.len(), armed, "scheduler started");
        Ok(())
    }

    /// Cancels every timer and stops the driver loop.
    pub fn shutdown(&self) -> Result<()> {
        let mut timers = lock(&self.timers)?;
        for (_, timer) in timers.drain() {
            timer.handle.abort();
        }
        lock(&self.deferred)?.clear();
        let _ = self.commands.send(Command::Shutdown);
        tracing::info!("scheduler stopped");
        Ok(())
    }

    /// Arms `task` according to its run mode, replacing any timer it already has.
    pub fn add_task(&self, task: &TaskDefinition) -> Result<()> {
        self.cancel_task(&task.name)?;
        if !task.enable {
            tracing::debug!(task = %task.name, "task disabled, not arming");
            return Ok(());
        }

        let mode = task.run_mode().inspect_err(|err| {
            tracing::error!(task = %task.name, error = %err, "unrecognized run mode");
        })?;
        match mode {
            RunMode::Start | RunMode::Disposable => self.arm_immediate(task),
            RunMode::Time => self.arm_time(task),
            RunMode::Interval => self.arm_interval(task),
        }
    }

    /// Aborts and forgets the task's timer. Returns whether one existed.
    pub fn cancel_task(&self, name: &str) -> Result<bool> {
        lock(&self.deferred)?.remove(name);
        let removed = lock(&self.timers)?.remove(name);
        match removed {
            Some(timer) => {
                timer.handle.abort();
                tracing::debug!(task = name, "timer cancelled");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn is_armed(&self, name: &str) -> Result<bool> {
        Ok(lock(&self.timers)?.contains_key(name))
    }

    pub fn is_running(&self, name: &str) -> Result<bool> {
        Ok(lock(&self.running)?.contains(name))
    }

    pub fn live_tasks(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = lock(&self.timers)?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Runs a stored task once outside its timer chain and persists the outcome.
    pub async fn run_now(&self, name: &str) -> Result<TaskDefinition> {
        let task = self
            .store
            .get(name)?
            .ok_or_else(|| CoreError::TaskNotFound(name.to_string()))?;
        if !lock(&self.running)?.insert(name.to_string()) {
            return Err(CoreError::InvalidOperation(format!(
                "Task {name} is already running"
            )));
        }

        self.emit(TaskEvent::Started {
            name: name.to_string(),
        });
        let done = run_task(self.ops.as_ref(), task).await;
        self.release(name)?;
        self.store.record_run(&done)?;
        self.emit(TaskEvent::Finished {
            name: done.name.clone(),
            error: done.run_info.error,
        });
        Ok(done)
    }

    fn emit(&self, event: TaskEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Marks `name` idle and replays a one-shot fire deferred behind the finished run.
    fn release(&self, name: &str) -> Result<()> {
        lock(&self.running)?.remove(name);
        let Some(timer_id) = lock(&self.deferred)?.remove(name) else {
            return Ok(());
        };
        if self.is_current(name, timer_id)? {
            tracing::debug!(task = name, "replaying deferred fire");
            let _ = self.commands.send(Command::Fire {
                name: name.to_string(),
                timer_id,
            });
        }
        Ok(())
    }

    fn install(
        &self,
        task: &TaskDefinition,
        spawn: impl FnOnce(Uuid) -> JoinHandle<()>,
    ) -> Result<()> {
        let id = Uuid::new_v4();
        let handle = spawn(id);
        let timer = TimerHandle {
            id,
            task: task.clone(),
            handle,
        };
        let previous = lock(&self.timers)?.insert(task.name.clone(), timer);
        if let Some(previous) = previous {
            previous.handle.abort();
        }
        Ok(())
    }

    fn arm_immediate(&self, task: &TaskDefinition) -> Result<()> {
        let commands = self.commands.clone();
        let name = task.name.clone();
        self.install(task, move |timer_id| {
            tokio::spawn(async move {
                let _ = commands.send(Command::Fire { name, timer_id });
            })
        })
    }

    fn arm_time(&self, task: &TaskDefinition) -> Result<()> {
        let now = Local::now().naive_local();
        let next = next_fire(now, &task.run.time)?;
        let delay = (next - now).to_std().unwrap_or_default();
        tracing::info!(task = %task.name, next = %next, "time-of-day timer armed");

        let commands = self.commands.clone();
        let name = task.name.clone();
        self.install(task, move |timer_id| {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = commands.send(Command::Fire { name, timer_id });
            })
        })
    }

    fn arm_interval(&self, task: &TaskDefinition) -> Result<()> {
        let period_ms = task.run.interval;
        if period_ms == 0 {
            return Err(CoreError::InvalidRunMode(format!(
                "interval must be positive for task {}",
                task.name
            )));
        }
        let period = Duration::from_millis(period_ms);
        tracing::info!(task = %task.name, period_ms, "interval timer armed");

        let commands = self.commands.clone();
        let name = task.name.clone();
        self.install(task, move |timer_id| {
            tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let fire = Command::Fire {
                        name: name.clone(),
                        timer_id,
                    };
                    if commands.send(fire).is_err() {
                        break;
                    }
                }
            })
        })
    }

    /// Definition the live timer `timer_id` was armed with, if it is still the task's timer.
    fn armed_task(&self, name: &str, timer_id: Uuid) -> Result<Option<TaskDefinition>> {
        Ok(lock(&self.timers)?
            .get(name)
            .filter(|timer| timer.id == timer_id)
            .map(|timer| timer.task.clone()))
    }

    fn is_current(&self, name: &str, timer_id: Uuid) -> Result<bool> {
        Ok(lock(&self.timers)?
            .get(name)
            .is_some_and(|timer| timer.id == timer_id))
    }

    async fn drive(self: Arc<Self>, mut inbox: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = inbox.recv().await {
            let result = match command {
                Command::Fire { name, timer_id } => self.on_fire(&name, timer_id),
                Command::Finished { task, timer_id } => self.on_finished(task, timer_id),
                Command::Shutdown => break,
            };
            if let Err(err) = result {
                tracing::error!(error = %err, "scheduler event failed");
            }
        }
        tracing::debug!("scheduler driver exited");
    }

    fn on_fire(&self, name: &str, timer_id: Uuid) -> Result<()> {
        let Some(armed) = self.armed_task(name, timer_id)? else {
            tracing::debug!(task = name, "stale timer fire dropped");
            return Ok(());
        };
        let task = self.store.get(name)?.unwrap_or(armed);
        if !lock(&self.running)?.insert(name.to_string()) {
            if matches!(task.run_mode(), Ok(RunMode::Start | RunMode::Disposable)) {
                tracing::debug!(task = name, "one-shot fire deferred until the current run ends");
                lock(&self.deferred)?.insert(name.to_string(), timer_id);
                return Ok(());
            }
            tracing::warn!(task = name, "previous run still in progress, skipping");
            self.emit(TaskEvent::Skipped {
                name: name.to_string(),
            });
            return Ok(());
        }

        self.emit(TaskEvent::Started {
            name: name.to_string(),
        });
        let ops = Arc::clone(&self.ops);
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let task = run_task(ops.as_ref(), task).await;
            let _ = commands.send(Command::Finished { task, timer_id });
        });
        Ok(())
    }

    fn on_finished(&self, task: TaskDefinition, timer_id: Uuid) -> Result<()> {
        let name = task.name.clone();
        self.release(&name)?;
        if let Err(err) = self.store.record_run(&task) {
            tracing::error!(task = %name, error = %err, "failed to persist run info");
        }
        self.emit(TaskEvent::Finished {
            name: name.clone(),
            error: task.run_info.error,
        });

        // re-added or cancelled while running
        if !self.is_current(&name, timer_id)? {
            return Ok(());
        }
        match task.run_mode()? {
            RunMode::Start => {
                self.cancel_task(&name)?;
            }
            RunMode::Disposable => {
                self.cancel_task(&name)?;
                self.store.delete_task(&name)?;
                tracing::info!(task = %name, "disposable task removed");
                self.emit(TaskEvent::Removed { name });
            }
            RunMode::Time => self.arm_time(&task)?,
            RunMode::Interval => {}
        }
        Ok(())
    }
}
