//! Integration tests for the persisted scheduler
//!
//! Covers schedule arithmetic across runs, one-off idempotence, catch-up
//! after a restart and the background driver.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use libosint::config::Config;
use libosint::db::Database;
use libosint::events::{Event, EventBus};
use libosint::fetchers::mock::MockFetcher;
use libosint::job::JobState;
use libosint::pipeline::Pipeline;
use libosint::scheduler::{NewTask, Scheduler};
use libosint::scheduling::ScheduleType;
use libosint::sink::MemorySink;
use libosint::types::{Platform, Target};

struct Fixture {
    dir: TempDir,
    pipeline: Pipeline,
    sink: Arc<MemorySink>,
}

impl Fixture {
    fn new() -> Self {
        let sink = Arc::new(MemorySink::new());
        let mut pipeline = Pipeline::from_config(
            &Config::default_config(),
            sink.clone(),
            EventBus::new(128),
        );
        pipeline.register_fetcher(Arc::new(MockFetcher::succeeding(Platform::Twitter, 3)));
        Self {
            dir: TempDir::new().unwrap(),
            pipeline,
            sink,
        }
    }

    async fn database(&self) -> Database {
        let path = self.dir.path().join("scheduler.db");
        Database::new(path.to_str().unwrap()).await.unwrap()
    }

    /// A scheduler over the same database, as after a process restart
    async fn scheduler(&self) -> Scheduler {
        let scheduler = Scheduler::new(self.database().await, self.pipeline.clone());
        scheduler.init().await.unwrap();
        scheduler
    }
}

fn twitter(user: &str) -> Target {
    Target::new(Platform::Twitter, user).unwrap()
}

#[tokio::test]
async fn test_daily_task_next_run_is_24h_after_last() {
    let fx = Fixture::new();
    let scheduler = fx.scheduler().await;

    let mut new = NewTask::new("daily", vec![twitter("alice")], ScheduleType::Daily);
    new.start_at = Some(Utc::now() - ChronoDuration::seconds(5));
    scheduler.add_task(new).await.unwrap();

    let runs = scheduler.run_due_tasks(Utc::now()).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].outcomes[0].state, JobState::Succeeded);
    assert_eq!(runs[0].outcomes[0].item_count, 3);

    let task = scheduler.get_task("daily").unwrap();
    assert_eq!(
        task.next_run_at.unwrap() - task.last_run_at.unwrap(),
        ChronoDuration::hours(24)
    );

    // Persisted the same way
    let reloaded = fx.scheduler().await;
    assert_eq!(reloaded.get_task("daily"), Some(task));
}

#[tokio::test]
async fn test_every_interval_schedule() {
    let fx = Fixture::new();
    let scheduler = fx.scheduler().await;

    let mut new = NewTask::new(
        "frequent",
        vec![twitter("alice")],
        "every_30_minutes".parse().unwrap(),
    );
    new.start_at = Some(Utc::now() - ChronoDuration::minutes(1));
    scheduler.add_task(new).await.unwrap();

    scheduler.run_due_tasks(Utc::now()).await.unwrap();
    let task = scheduler.get_task("frequent").unwrap();
    assert_eq!(
        task.next_run_at.unwrap() - task.last_run_at.unwrap(),
        ChronoDuration::minutes(30)
    );
}

#[tokio::test]
async fn test_once_task_is_idempotent() {
    let fx = Fixture::new();
    let scheduler = fx.scheduler().await;
    scheduler
        .add_task(NewTask::new(
            "snapshot",
            vec![twitter("alice"), twitter("bob")],
            ScheduleType::Once,
        ))
        .await
        .unwrap();

    let runs = scheduler.run_due_tasks(Utc::now()).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(fx.sink.len(), 2);

    let after_first = scheduler.get_task("snapshot").unwrap();
    assert!(!after_first.enabled);
    assert!(after_first.next_run_at.is_none());

    scheduler.run_task_now("snapshot").await.unwrap();
    let after_second = scheduler.get_task("snapshot").unwrap();
    assert!(!after_second.enabled);
    assert!(after_second.next_run_at.is_none());

    // Nothing left for the driver, even after a restart
    let reloaded = fx.scheduler().await;
    assert!(reloaded
        .run_due_tasks(Utc::now() + ChronoDuration::days(30))
        .await
        .unwrap()
        .is_empty());
    assert_eq!(fx.sink.len(), 4);

    let history = reloaded.history("snapshot", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].manual);
    assert!(!history[1].manual);
}

#[tokio::test]
async fn test_overdue_task_catches_up_once_after_restart() {
    let fx = Fixture::new();
    {
        let scheduler = fx.scheduler().await;
        let mut new = NewTask::new("hourly", vec![twitter("alice")], ScheduleType::Hourly);
        new.start_at = Some(Utc::now() - ChronoDuration::days(3));
        scheduler.add_task(new).await.unwrap();
    }

    let restarted = fx.scheduler().await;
    let now = Utc::now();
    let runs = restarted.run_due_tasks(now).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(fx.sink.len(), 1);

    let task = restarted.get_task("hourly").unwrap();
    assert!(task.next_run_at.unwrap() > now);

    assert!(restarted.run_due_tasks(Utc::now()).await.unwrap().is_empty());
    assert_eq!(restarted.history("hourly", 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_removed_task_keeps_history() {
    let fx = Fixture::new();
    let scheduler = fx.scheduler().await;
    scheduler
        .add_task(NewTask::new("gone", vec![twitter("alice")], ScheduleType::Once))
        .await
        .unwrap();
    scheduler.run_due_tasks(Utc::now()).await.unwrap();
    scheduler.remove_task("gone").await.unwrap();

    let reloaded = fx.scheduler().await;
    assert!(reloaded.list_tasks().is_empty());
    assert_eq!(reloaded.history("gone", 5).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_driver_runs_due_tasks_and_stops() {
    let fx = Fixture::new();
    let scheduler = fx.scheduler().await;
    let mut events = fx.pipeline.events().subscribe();

    scheduler
        .add_task(NewTask::new("now", vec![twitter("alice")], ScheduleType::Once))
        .await
        .unwrap();

    let handle = scheduler.start(Duration::from_millis(50));
    let completed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(Event::TaskRunCompleted { task, .. }) = events.recv().await {
                break task;
            }
        }
    })
    .await
    .unwrap();
    handle.stop().await;

    assert_eq!(completed, "now");
    assert_eq!(fx.sink.len(), 1);
    assert!(!scheduler.get_task("now").unwrap().enabled);
}
