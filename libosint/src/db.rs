//! Database operations
//!
//! SQLite holds the scheduled tasks, their run history and the results stored
//! by [`crate::sink::DatabaseSink`]. Timestamps are Unix seconds; nested data
//! (targets, outcomes, items) is stored as JSON text.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::path::Path;
use uuid::Uuid;

use crate::error::{DbError, Result};
use crate::scheduler::{ScheduledTask, TargetOutcome, TaskRun};
use crate::types::{FetchResult, Platform, Target};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

fn timestamp(table: &'static str, secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        DbError::Corrupt {
            table,
            reason: format!("timestamp out of range: {}", secs),
        }
        .into()
    })
}

fn from_json<T: serde::de::DeserializeOwned>(table: &'static str, text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| {
        DbError::Corrupt {
            table,
            reason: e.to_string(),
        }
        .into()
    })
}

fn to_json<T: serde::Serialize>(table: &'static str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| {
        DbError::Corrupt {
            table,
            reason: e.to_string(),
        }
        .into()
    })
}

fn parse_column<T: std::str::FromStr>(table: &'static str, column: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| {
        DbError::Corrupt {
            table,
            reason: format!("{}: {}", column, e),
        }
        .into()
    })
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // mode=rwc creates the file on first use
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    /// Insert or replace a task
    pub async fn upsert_task(&self, task: &ScheduledTask) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_tasks
                (name, targets, schedule, next_run_at, last_run_at, enabled, max_items, proxy_preference, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                targets = excluded.targets,
                schedule = excluded.schedule,
                next_run_at = excluded.next_run_at,
                last_run_at = excluded.last_run_at,
                enabled = excluded.enabled,
                max_items = excluded.max_items,
                proxy_preference = excluded.proxy_preference
            "#,
        )
        .bind(&task.name)
        .bind(to_json("scheduled_tasks", &task.targets)?)
        .bind(task.schedule.to_string())
        .bind(task.next_run_at.map(|t| t.timestamp()))
        .bind(task.last_run_at.map(|t| t.timestamp()))
        .bind(task.enabled)
        .bind(task.max_items as i64)
        .bind(task.proxy_preference.as_str())
        .bind(task.created_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Delete a task; returns whether it existed
    pub async fn delete_task(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM scheduled_tasks WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn load_tasks(&self) -> Result<Vec<ScheduledTask>> {
        let rows = sqlx::query(
            r#"
            SELECT name, targets, schedule, next_run_at, last_run_at, enabled, max_items, proxy_preference, created_at
            FROM scheduled_tasks
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(Self::task_from_row).collect()
    }

    pub async fn get_task(&self, name: &str) -> Result<Option<ScheduledTask>> {
        let row = sqlx::query(
            r#"
            SELECT name, targets, schedule, next_run_at, last_run_at, enabled, max_items, proxy_preference, created_at
            FROM scheduled_tasks WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(Self::task_from_row).transpose()
    }

    fn task_from_row(r: &SqliteRow) -> Result<ScheduledTask> {
        const TABLE: &str = "scheduled_tasks";

        let targets: Vec<Target> = from_json(TABLE, &r.get::<String, _>("targets"))?;
        let schedule = parse_column(TABLE, "schedule", &r.get::<String, _>("schedule"))?;
        let proxy_preference =
            parse_column(TABLE, "proxy_preference", &r.get::<String, _>("proxy_preference"))?;

        Ok(ScheduledTask {
            name: r.get("name"),
            targets,
            schedule,
            next_run_at: r
                .get::<Option<i64>, _>("next_run_at")
                .map(|secs| timestamp(TABLE, secs))
                .transpose()?,
            last_run_at: r
                .get::<Option<i64>, _>("last_run_at")
                .map(|secs| timestamp(TABLE, secs))
                .transpose()?,
            enabled: r.get::<bool, _>("enabled"),
            max_items: r.get::<i64, _>("max_items").max(1) as usize,
            proxy_preference,
            created_at: timestamp(TABLE, r.get("created_at"))?,
        })
    }

    pub async fn insert_task_run(&self, run: &TaskRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_runs (id, task_name, ran_at, manual, outcomes)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id.to_string())
        .bind(&run.task_name)
        .bind(run.ran_at.timestamp())
        .bind(run.manual)
        .bind(to_json("task_runs", &run.outcomes)?)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Most recent runs of `task_name`, newest first
    pub async fn task_runs(&self, task_name: &str, limit: usize) -> Result<Vec<TaskRun>> {
        const TABLE: &str = "task_runs";

        let rows = sqlx::query(
            r#"
            SELECT id, task_name, ran_at, manual, outcomes
            FROM task_runs
            WHERE task_name = ?
            ORDER BY ran_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(task_name)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter()
            .map(|r| {
                let outcomes: Vec<TargetOutcome> = from_json(TABLE, &r.get::<String, _>("outcomes"))?;
                Ok(TaskRun {
                    id: parse_column::<Uuid>(TABLE, "id", &r.get::<String, _>("id"))?,
                    task_name: r.get("task_name"),
                    ran_at: timestamp(TABLE, r.get("ran_at"))?,
                    manual: r.get::<bool, _>("manual"),
                    outcomes,
                })
            })
            .collect()
    }

    /// Store a fetch result; returns its row id
    pub async fn insert_fetch_result(&self, result: &FetchResult) -> Result<i64> {
        let outcome = sqlx::query(
            r#"
            INSERT INTO fetch_results
                (platform, username, fetched_at, success, error_kind, message, item_count, items)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(result.target.platform().as_str())
        .bind(result.target.username())
        .bind(result.fetched_at.timestamp())
        .bind(result.success)
        .bind(result.error.map(|kind| kind.as_str()))
        .bind(&result.message)
        .bind(result.item_count() as i64)
        .bind(to_json("fetch_results", &result.items)?)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(outcome.last_insert_rowid())
    }

    /// Latest stored results, newest first, optionally for one target
    pub async fn recent_results(
        &self,
        target: Option<&Target>,
        limit: usize,
    ) -> Result<Vec<FetchResult>> {
        const TABLE: &str = "fetch_results";

        let mut query_str = String::from(
            "SELECT platform, username, fetched_at, success, error_kind, message, items FROM fetch_results",
        );
        if target.is_some() {
            query_str.push_str(" WHERE platform = ? AND username = ?");
        }
        query_str.push_str(" ORDER BY fetched_at DESC, id DESC LIMIT ?");

        let mut query = sqlx::query(&query_str);
        if let Some(t) = target {
            query = query.bind(t.platform().as_str()).bind(t.username());
        }
        query = query.bind(limit as i64);

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter()
            .map(|r| {
                let platform: Platform =
                    parse_column(TABLE, "platform", &r.get::<String, _>("platform"))?;
                let target = Target::new(platform, r.get::<String, _>("username")).map_err(|e| {
                    DbError::Corrupt {
                        table: TABLE,
                        reason: e.to_string(),
                    }
                })?;
                let error = r
                    .get::<Option<String>, _>("error_kind")
                    .map(|kind| parse_column(TABLE, "error_kind", &kind))
                    .transpose()?;

                Ok(FetchResult {
                    target,
                    items: from_json(TABLE, &r.get::<String, _>("items"))?,
                    fetched_at: timestamp(TABLE, r.get("fetched_at"))?,
                    success: r.get::<bool, _>("success"),
                    error,
                    message: r.get("message"),
                })
            })
            .collect()
    }

    /// Number of stored results per platform since `since`
    pub async fn result_counts_since(&self, since: DateTime<Utc>) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT platform, COUNT(*) AS count
            FROM fetch_results
            WHERE fetched_at >= ?
            GROUP BY platform
            ORDER BY platform
            "#,
        )
        .bind(since.timestamp())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("platform"), r.get::<i64, _>("count")))
            .collect())
    }
}
