//! Persisted task scheduler
//!
//! The scheduler keeps the authoritative table of [`ScheduledTask`]s in
//! memory and writes every change through to SQLite, so tasks survive
//! restarts. A single driver loop evaluates due tasks on a fixed tick and
//! dispatches one collection job per target through the shared pipeline.
//!
//! Due-time bookkeeping happens before a run is dispatched: `last_run_at`
//! becomes the tick time and `next_run_at` is computed forward from it. A task
//! that was overdue for days therefore runs once, not once per missed period.
//!
//! ```no_run
//! use libosint::scheduler::{NewTask, Scheduler};
//! use libosint::scheduling::ScheduleType;
//!
//! # async fn example(scheduler: Scheduler) -> libosint::error::Result<()> {
//! scheduler.init().await?;
//! scheduler
//!     .add_task(NewTask::new(
//!         "watchlist",
//!         vec!["demo:alice".parse()?],
//!         ScheduleType::Daily,
//!     ))
//!     .await?;
//!
//! let handle = scheduler.start(std::time::Duration::from_secs(60));
//! // ...
//! handle.stop().await;
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Timelike, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cancel::{CancelHandle, CancelSignal};
use crate::db::Database;
use crate::error::{ErrorKind, OsintError, Result};
use crate::events::Event;
use crate::job::{JobOutcome, JobState};
use crate::pipeline::Pipeline;
use crate::scheduling::ScheduleType;
use crate::types::{FetchRequest, ProxyPreference, Target};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub name: String,
    /// Sorted and free of duplicates
    pub targets: Vec<Target>,
    pub schedule: ScheduleType,
    /// `None` once a one-off task has run
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub max_items: usize,
    pub proxy_preference: ProxyPreference,
    pub created_at: DateTime<Utc>,
}

impl ScheduledTask {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run_at.is_some_and(|next| next <= now)
    }
}

/// Parameters for [`Scheduler::add_task`]
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub targets: Vec<Target>,
    pub schedule: ScheduleType,
    /// First run; defaults from the schedule when absent
    pub start_at: Option<DateTime<Utc>>,
    /// Defaults to `collection.default_max_items`
    pub max_items: Option<usize>,
    pub proxy_preference: ProxyPreference,
}

impl NewTask {
    pub fn new(name: impl Into<String>, targets: Vec<Target>, schedule: ScheduleType) -> Self {
        Self {
            name: name.into(),
            targets,
            schedule,
            start_at: None,
            max_items: None,
            proxy_preference: ProxyPreference::None,
        }
    }
}

/// Result of one target within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetOutcome {
    pub target: Target,
    pub state: JobState,
    pub attempts: u32,
    pub item_count: usize,
    pub error: Option<ErrorKind>,
}

impl From<&JobOutcome> for TargetOutcome {
    fn from(outcome: &JobOutcome) -> Self {
        Self {
            target: outcome.result.target.clone(),
            state: outcome.state,
            attempts: outcome.attempts,
            item_count: outcome.result.item_count(),
            error: outcome.result.error,
        }
    }
}

/// Run-history entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: Uuid,
    pub task_name: String,
    pub ran_at: DateTime<Utc>,
    pub manual: bool,
    pub outcomes: Vec<TargetOutcome>,
}

impl TaskRun {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.state.has_data()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

struct ActiveRun {
    run_id: Uuid,
    cancel: CancelHandle,
}

struct Claim {
    task: ScheduledTask,
    run_id: Uuid,
    cancel: CancelHandle,
    ran_at: DateTime<Utc>,
    manual: bool,
}

struct SchedulerInner {
    db: Database,
    pipeline: Pipeline,
    tasks: RwLock<BTreeMap<String, ScheduledTask>>,
    running: Mutex<HashMap<String, ActiveRun>>,
    /// Serializes write-through updates; held across database calls
    writes: tokio::sync::Mutex<()>,
    shutdown: CancelHandle,
}

/// Cheap-to-clone handle to the scheduler
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

/// Handle to the background driver started by [`Scheduler::start`]
pub struct SchedulerHandle {
    shutdown: CancelHandle,
    driver: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the driver, cancel in-flight jobs and wait for their history to be written
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.driver.await {
            error!(error = %e, "scheduler driver panicked");
        }
    }
}

fn whole_seconds(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_nanosecond(0).unwrap_or(now)
}

impl Scheduler {
    pub fn new(db: Database, pipeline: Pipeline) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                db,
                pipeline,
                tasks: RwLock::new(BTreeMap::new()),
                running: Mutex::new(HashMap::new()),
                writes: tokio::sync::Mutex::new(()),
                shutdown: CancelHandle::new(),
            }),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    /// Load persisted tasks; returns how many were loaded
    pub async fn init(&self) -> Result<usize> {
        let _guard = self.inner.writes.lock().await;
        let tasks = self.inner.db.load_tasks().await?;
        let count = tasks.len();

        let overdue = tasks.iter().filter(|t| t.is_due(Utc::now())).count();
        *self.inner.tasks.write() = tasks.into_iter().map(|t| (t.name.clone(), t)).collect();

        info!(tasks = count, overdue, "scheduler loaded tasks");
        Ok(count)
    }

    /// Validate and persist a new task
    ///
    /// # Errors
    ///
    /// `OsintError::InvalidInput` for an empty or duplicate name, no targets,
    /// a platform without a registered fetcher, or `max_items == 0`.
    pub async fn add_task(&self, new: NewTask) -> Result<ScheduledTask> {
        let name = new.name.trim().to_string();
        if name.is_empty() {
            return Err(OsintError::InvalidInput(
                "Task name cannot be empty".to_string(),
            ));
        }

        let targets: Vec<Target> = new
            .targets
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if targets.is_empty() {
            return Err(OsintError::InvalidInput(
                "Task must have at least one target".to_string(),
            ));
        }

        let fetchers = self.inner.pipeline.fetchers();
        if let Some(unsupported) = targets.iter().find(|t| !fetchers.supports(t.platform())) {
            return Err(OsintError::InvalidInput(format!(
                "No fetcher registered for platform '{}' (target {})",
                unsupported.platform(),
                unsupported
            )));
        }

        let max_items = new
            .max_items
            .unwrap_or_else(|| self.inner.pipeline.default_max_items());
        if max_items == 0 {
            return Err(OsintError::InvalidInput(
                "max_items must be greater than zero".to_string(),
            ));
        }

        let now = whole_seconds(Utc::now());
        let task = ScheduledTask {
            name: name.clone(),
            targets,
            next_run_at: new.schedule.first_run(now, new.start_at)?.map(whole_seconds),
            schedule: new.schedule,
            last_run_at: None,
            enabled: true,
            max_items,
            proxy_preference: new.proxy_preference,
            created_at: now,
        };

        let _guard = self.inner.writes.lock().await;
        if self.inner.tasks.read().contains_key(&name) {
            return Err(OsintError::InvalidInput(format!(
                "Task '{}' already exists",
                name
            )));
        }
        self.inner.db.upsert_task(&task).await?;
        self.inner.tasks.write().insert(name, task.clone());

        info!(
            task = %task.name,
            schedule = %task.schedule,
            targets = task.targets.len(),
            next_run_at = ?task.next_run_at,
            "task added"
        );
        Ok(task)
    }

    /// Delete a task and cancel its in-flight jobs
    pub async fn remove_task(&self, name: &str) -> Result<()> {
        let _guard = self.inner.writes.lock().await;
        if !self.inner.tasks.read().contains_key(name) {
            return Err(OsintError::NotFound(format!("task '{}'", name)));
        }

        self.inner.db.delete_task(name).await?;
        self.inner.tasks.write().remove(name);

        if let Some(active) = self.inner.running.lock().remove(name) {
            info!(task = %name, "cancelling in-flight run of removed task");
            active.cancel.cancel();
        }
        info!(task = %name, "task removed");
        Ok(())
    }

    /// All tasks, ordered by name
    pub fn list_tasks(&self) -> Vec<ScheduledTask> {
        self.inner.tasks.read().values().cloned().collect()
    }

    pub fn get_task(&self, name: &str) -> Option<ScheduledTask> {
        self.inner.tasks.read().get(name).cloned()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.inner.running.lock().contains_key(name)
    }

    /// Enable or disable a task
    ///
    /// A one-off task that has already run cannot be re-enabled.
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<ScheduledTask> {
        let _guard = self.inner.writes.lock().await;
        let mut task = self
            .get_task(name)
            .ok_or_else(|| OsintError::NotFound(format!("task '{}'", name)))?;

        if enabled && task.schedule.is_once() && task.next_run_at.is_none() {
            return Err(OsintError::InvalidInput(format!(
                "Task '{}' already ran once and cannot be re-enabled",
                name
            )));
        }

        task.enabled = enabled;
        self.inner.db.upsert_task(&task).await?;
        self.inner.tasks.write().insert(task.name.clone(), task.clone());
        Ok(task)
    }

    /// Most recent runs of a task, newest first
    pub async fn history(&self, name: &str, limit: usize) -> Result<Vec<TaskRun>> {
        self.inner.db.task_runs(name, limit).await
    }

    /// Run every enabled task whose `next_run_at <= now`, waiting for the runs
    pub async fn run_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<TaskRun>> {
        let claims = self.claim_due(now).await?;
        let runs = join_all(claims.into_iter().map(|claim| self.execute(claim))).await;
        Ok(runs)
    }

    /// Run a task immediately, outside its schedule
    ///
    /// Records `last_run_at` and history. A recurring schedule keeps its
    /// `next_run_at` unless that time has already passed; a one-off task ends
    /// up disabled with no next run, however often it is triggered.
    pub async fn run_task_now(&self, name: &str) -> Result<TaskRun> {
        let now = whole_seconds(Utc::now());
        let claim = {
            let _guard = self.inner.writes.lock().await;
            let mut task = self
                .get_task(name)
                .ok_or_else(|| OsintError::NotFound(format!("task '{}'", name)))?;
            if self.is_running(name) {
                return Err(OsintError::InvalidInput(format!(
                    "Task '{}' is already running",
                    name
                )));
            }

            task.last_run_at = Some(now);
            if task.schedule.is_once() {
                task.enabled = false;
                task.next_run_at = None;
            } else if task.next_run_at.map_or(true, |next| next < now) {
                task.next_run_at = self.next_run(&task, now);
            }

            self.inner.db.upsert_task(&task).await?;
            self.inner.tasks.write().insert(task.name.clone(), task.clone());
            self.register_run(task, now, true)
        };

        Ok(self.execute(claim).await)
    }

    fn next_run(&self, task: &ScheduledTask, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match task.schedule.next_after(now) {
            Ok(next) => next,
            Err(e) => {
                warn!(task = %task.name, error = %e, "cannot compute next run");
                None
            }
        }
    }

    fn register_run(&self, task: ScheduledTask, ran_at: DateTime<Utc>, manual: bool) -> Claim {
        let run_id = Uuid::new_v4();
        let cancel = CancelHandle::new();
        self.inner.running.lock().insert(
            task.name.clone(),
            ActiveRun {
                run_id,
                cancel: cancel.clone(),
            },
        );
        Claim {
            task,
            run_id,
            cancel,
            ran_at,
            manual,
        }
    }

    /// Advance every due task's schedule and mark it running
    async fn claim_due(&self, now: DateTime<Utc>) -> Result<Vec<Claim>> {
        let now = whole_seconds(now);
        let _guard = self.inner.writes.lock().await;

        let due: Vec<ScheduledTask> = self
            .inner
            .tasks
            .read()
            .values()
            .filter(|task| task.is_due(now))
            .cloned()
            .collect();

        let mut claims = Vec::with_capacity(due.len());
        for mut task in due {
            if self.is_running(&task.name) {
                debug!(task = %task.name, "still running, skipping this tick");
                continue;
            }

            task.last_run_at = Some(now);
            if task.schedule.is_once() {
                task.enabled = false;
                task.next_run_at = None;
            } else {
                task.next_run_at = self.next_run(&task, now);
                if task.next_run_at.is_none() {
                    task.enabled = false;
                }
            }

            self.inner.db.upsert_task(&task).await?;
            self.inner.tasks.write().insert(task.name.clone(), task.clone());
            claims.push(self.register_run(task, now, false));
        }

        Ok(claims)
    }

    /// Run every target of a claimed task and record the history entry
    async fn execute(&self, claim: Claim) -> TaskRun {
        let Claim {
            task,
            run_id,
            cancel,
            ran_at,
            manual,
        } = claim;
        let signal: CancelSignal = self.inner.shutdown.signal().merge(&cancel.signal());

        info!(task = %task.name, targets = task.targets.len(), manual, "task run started");
        let requests = task
            .targets
            .iter()
            .map(|target| FetchRequest {
                target: target.clone(),
                max_items: task.max_items,
                proxy_preference: task.proxy_preference,
                issued_at: ran_at,
            })
            .collect();
        let outcomes = self.inner.pipeline.execute_all(requests, &signal).await;

        let run = TaskRun {
            id: run_id,
            task_name: task.name.clone(),
            ran_at,
            manual,
            outcomes: outcomes.iter().map(TargetOutcome::from).collect(),
        };

        if let Err(e) = self.inner.db.insert_task_run(&run).await {
            error!(task = %task.name, error = %e, "failed to record run history");
        }

        {
            let mut running = self.inner.running.lock();
            if running.get(&task.name).is_some_and(|a| a.run_id == run_id) {
                running.remove(&task.name);
            }
        }

        info!(
            task = %task.name,
            succeeded = run.succeeded(),
            failed = run.failed(),
            "task run finished"
        );
        self.inner.pipeline.events().emit(Event::TaskRunCompleted {
            task: task.name,
            run_id,
            manual,
            succeeded: run.succeeded(),
            failed: run.failed(),
        });
        run
    }

    /// Spawn the driver loop evaluating due tasks every `tick`
    ///
    /// Runs are spawned so a slow task never delays the next tick. Stopping
    /// the returned handle cancels in-flight runs and waits for them.
    pub fn start(&self, tick: Duration) -> SchedulerHandle {
        let scheduler = self.clone();
        let stop = self.inner.shutdown.signal();

        let driver = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut runs: JoinSet<TaskRun> = JoinSet::new();

            info!(tick_secs = tick.as_secs(), "scheduler started");
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    Some(finished) = runs.join_next(), if !runs.is_empty() => {
                        if let Err(e) = finished {
                            error!(error = %e, "task run panicked");
                        }
                    }
                    _ = ticker.tick() => {
                        match scheduler.claim_due(Utc::now()).await {
                            Ok(claims) => {
                                for claim in claims {
                                    let scheduler = scheduler.clone();
                                    runs.spawn(async move { scheduler.execute(claim).await });
                                }
                            }
                            Err(e) => error!(error = %e, "failed to evaluate due tasks"),
                        }
                    }
                }
            }

            // In-flight runs observe the shutdown signal and finish as cancelled
            while let Some(finished) = runs.join_next().await {
                if let Err(e) = finished {
                    error!(error = %e, "task run panicked");
                }
            }
            info!("scheduler stopped");
        });

        SchedulerHandle {
            shutdown: self.inner.shutdown.clone(),
            driver,
        }
    }

    /// Cancel all in-flight runs without waiting
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::EventBus;
    use crate::fetchers::mock::MockFetcher;
    use crate::sink::MemorySink;
    use crate::types::Platform;
    use tempfile::TempDir;

    async fn setup() -> (Scheduler, Arc<MemorySink>, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("tasks.db").to_str().unwrap())
            .await
            .unwrap();
        let sink = Arc::new(MemorySink::new());
        let mut pipeline =
            Pipeline::from_config(&Config::default_config(), sink.clone(), EventBus::new(64));
        pipeline.register_fetcher(Arc::new(MockFetcher::succeeding(Platform::Instagram, 2)));
        (Scheduler::new(db, pipeline), sink, dir)
    }

    fn demo(user: &str) -> Target {
        Target::new(Platform::Other("demo".to_string()), user).unwrap()
    }

    #[tokio::test]
    async fn test_add_task_validation() {
        let (scheduler, _sink, _dir) = setup().await;

        let empty_name = NewTask::new("  ", vec![demo("a")], ScheduleType::Daily);
        assert!(scheduler.add_task(empty_name).await.is_err());

        let no_targets = NewTask::new("t", vec![], ScheduleType::Daily);
        let err = scheduler.add_task(no_targets).await.unwrap_err();
        assert!(err.to_string().contains("at least one target"));

        let unsupported = NewTask::new(
            "t",
            vec![Target::new(Platform::TikTok, "x").unwrap()],
            ScheduleType::Daily,
        );
        let err = scheduler.add_task(unsupported).await.unwrap_err();
        assert!(err.to_string().contains("tiktok"));

        let mut zero = NewTask::new("t", vec![demo("a")], ScheduleType::Daily);
        zero.max_items = Some(0);
        assert!(scheduler.add_task(zero).await.is_err());

        assert!(scheduler.list_tasks().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let (scheduler, _sink, _dir) = setup().await;
        scheduler
            .add_task(NewTask::new("t", vec![demo("a")], ScheduleType::Daily))
            .await
            .unwrap();
        let err = scheduler
            .add_task(NewTask::new("t", vec![demo("b")], ScheduleType::Hourly))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_targets_deduplicated_and_defaults_applied() {
        let (scheduler, _sink, _dir) = setup().await;
        let task = scheduler
            .add_task(NewTask::new(
                "t",
                vec![demo("b"), demo("a"), demo("b")],
                ScheduleType::Hourly,
            ))
            .await
            .unwrap();

        assert_eq!(task.targets, vec![demo("a"), demo("b")]);
        assert_eq!(task.max_items, 20);
        assert!(task.enabled);
        let next = task.next_run_at.unwrap();
        assert_eq!(next - task.created_at, chrono::Duration::hours(1));
    }

    #[tokio::test]
    async fn test_daily_run_advances_24h() {
        let (scheduler, sink, _dir) = setup().await;
        let mut new = NewTask::new("daily", vec![demo("a"), demo("b")], ScheduleType::Daily);
        new.start_at = Some(Utc::now() - chrono::Duration::minutes(1));
        scheduler.add_task(new).await.unwrap();

        let runs = scheduler.run_due_tasks(Utc::now()).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].outcomes.len(), 2);
        assert_eq!(runs[0].succeeded(), 2);
        assert_eq!(sink.len(), 2);

        let task = scheduler.get_task("daily").unwrap();
        let last = task.last_run_at.unwrap();
        assert_eq!(task.next_run_at.unwrap() - last, chrono::Duration::hours(24));

        // Not due again on the same tick
        assert!(scheduler.run_due_tasks(Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_task_not_run() {
        let (scheduler, _sink, _dir) = setup().await;
        let mut new = NewTask::new("t", vec![demo("a")], ScheduleType::Hourly);
        new.start_at = Some(Utc::now() - chrono::Duration::minutes(5));
        scheduler.add_task(new).await.unwrap();
        scheduler.set_enabled("t", false).await.unwrap();

        assert!(scheduler.run_due_tasks(Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_once_task_runs_once() {
        let (scheduler, _sink, _dir) = setup().await;
        scheduler
            .add_task(NewTask::new("once", vec![demo("a")], ScheduleType::Once))
            .await
            .unwrap();

        let runs = scheduler.run_due_tasks(Utc::now()).await.unwrap();
        assert_eq!(runs.len(), 1);

        let task = scheduler.get_task("once").unwrap();
        assert!(!task.enabled);
        assert_eq!(task.next_run_at, None);

        // Forced second run leaves it disabled with no next run
        let manual = scheduler.run_task_now("once").await.unwrap();
        assert!(manual.manual);
        let task = scheduler.get_task("once").unwrap();
        assert!(!task.enabled);
        assert_eq!(task.next_run_at, None);

        assert!(scheduler.set_enabled("once", true).await.is_err());
        assert!(scheduler.run_due_tasks(Utc::now()).await.unwrap().is_empty());
        assert_eq!(scheduler.history("once", 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_manual_run_keeps_recurring_schedule() {
        let (scheduler, _sink, _dir) = setup().await;
        let task = scheduler
            .add_task(NewTask::new("weekly", vec![demo("a")], ScheduleType::Weekly))
            .await
            .unwrap();

        let run = scheduler.run_task_now("weekly").await.unwrap();
        assert_eq!(run.outcomes.len(), 1);

        let after = scheduler.get_task("weekly").unwrap();
        assert_eq!(after.next_run_at, task.next_run_at);
        assert!(after.last_run_at.is_some());
    }

    #[tokio::test]
    async fn test_remove_task() {
        let (scheduler, _sink, _dir) = setup().await;
        scheduler
            .add_task(NewTask::new("t", vec![demo("a")], ScheduleType::Daily))
            .await
            .unwrap();

        scheduler.remove_task("t").await.unwrap();
        assert!(scheduler.get_task("t").is_none());
        assert!(matches!(
            scheduler.remove_task("t").await,
            Err(OsintError::NotFound(_))
        ));
        assert!(matches!(
            scheduler.run_task_now("t").await,
            Err(OsintError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_tasks_survive_reload() {
        let (scheduler, _sink, dir) = setup().await;
        scheduler
            .add_task(NewTask::new("keep", vec![demo("a")], ScheduleType::Hourly))
            .await
            .unwrap();

        let db = Database::new(dir.path().join("tasks.db").to_str().unwrap())
            .await
            .unwrap();
        let reloaded = Scheduler::new(db, scheduler.pipeline().clone());
        assert_eq!(reloaded.init().await.unwrap(), 1);
        assert_eq!(reloaded.get_task("keep"), scheduler.get_task("keep"));
    }

    #[tokio::test]
    async fn test_explicit_start_matches_reloaded_row() {
        let (scheduler, _sink, dir) = setup().await;
        let start = whole_seconds(Utc::now()) + chrono::Duration::hours(2)
            + chrono::Duration::milliseconds(750);
        let mut new = NewTask::new("later", vec![demo("a")], ScheduleType::Daily);
        new.start_at = Some(start);

        let task = scheduler.add_task(new).await.unwrap();
        assert_eq!(task.next_run_at, Some(start - chrono::Duration::milliseconds(750)));

        let db = Database::new(dir.path().join("tasks.db").to_str().unwrap())
            .await
            .unwrap();
        let reloaded = Scheduler::new(db, scheduler.pipeline().clone());
        reloaded.init().await.unwrap();
        assert_eq!(reloaded.get_task("later"), Some(task));
    }

    #[tokio::test]
    async fn test_run_completed_event() {
        let (scheduler, _sink, _dir) = setup().await;
        let mut events = scheduler.pipeline().events().subscribe();
        scheduler
            .add_task(NewTask::new("t", vec![demo("a")], ScheduleType::Once))
            .await
            .unwrap();

        scheduler.run_task_now("t").await.unwrap();

        let mut completed = None;
        while let Ok(event) = events.try_recv() {
            if let Event::TaskRunCompleted { task, succeeded, .. } = event {
                completed = Some((task, succeeded));
            }
        }
        assert_eq!(completed, Some(("t".to_string(), 1)));
    }
}
