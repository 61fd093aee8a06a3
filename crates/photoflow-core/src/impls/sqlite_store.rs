//! SQLite implementation of TaskStore.
//!
//! Tasks are stored as JSON documents with `status` and `sku_code` lifted into
//! indexed columns. Every write appends a row to `task_changes` inside the same
//! transaction, and subscriptions poll that table from the highest sequence
//! number present when they opened.

use std::collections::VecDeque;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::{debug, warn};

use crate::domain::{
    ChangeEvent, ChangeFilter, OperationKind, StoreError, Task, TaskFilter, TaskId, TaskUpdate,
    UpdateResult,
};
use crate::ports::{ChangeStream, TaskStore};

/// SQLite-backed task store.
pub struct SqliteTaskStore {
    pool: SqlitePool,
    poll_interval: Duration,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool, poll_interval: Duration) -> Self {
        Self {
            pool,
            poll_interval,
        }
    }

    /// Open (creating if needed) the database at `url` and run migrations.
    pub async fn connect(url: &str, poll_interval: Duration) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Backend(format!("invalid database url: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(map_sqlx_error)?;

        let store = Self::new(pool, poll_interval);
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create the tasks and task_changes tables.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                sku_code TEXT NOT NULL,
                status TEXT NOT NULL,
                document TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_tasks_sku
            ON tasks(sku_code, created_at)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_changes (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT,
                operation TEXT NOT NULL,
                updated_fields TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Connection(err.to_string()),
        other => StoreError::Backend(other.to_string()),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let document: Option<String> =
            sqlx::query_scalar("SELECT document FROM tasks WHERE id = ?")
                .bind(id.to_key())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        document
            .map(|doc| serde_json::from_str(&doc).map_err(StoreError::from))
            .transpose()
    }

    async fn find_by_sku(&self, sku_code: &str) -> Result<Option<Task>, StoreError> {
        let document: Option<String> = sqlx::query_scalar(
            r#"
            SELECT document FROM tasks
            WHERE sku_code = ?
            ORDER BY created_at, id
            LIMIT 1
            "#,
        )
        .bind(sku_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        document
            .map(|doc| serde_json::from_str(&doc).map_err(StoreError::from))
            .transpose()
    }

    async fn insert(&self, task: Task) -> Result<TaskId, StoreError> {
        let id = task.id;
        let document = serde_json::to_string(&task)?;
        let now = now_rfc3339();

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            INSERT INTO tasks (id, sku_code, status, document, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_key())
        .bind(&task.sku_code)
        .bind(task.status.as_str())
        .bind(document)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Duplicate(id)
            } else {
                map_sqlx_error(e)
            }
        })?;

        sqlx::query(
            r#"
            INSERT INTO task_changes (task_id, operation, created_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(id.to_key())
        .bind(OperationKind::Insert.as_str())
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(id)
    }

    async fn atomic_update(
        &self,
        filter: &TaskFilter,
        update: &TaskUpdate,
    ) -> Result<UpdateResult, StoreError> {
        // take the write lock up front so the read below cannot go stale
        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(map_sqlx_error)?;

        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT document, version FROM tasks WHERE id = ?")
                .bind(filter.id.to_key())
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;

        let Some((document, version)) = row else {
            tx.commit().await.map_err(map_sqlx_error)?;
            return Ok(UpdateResult { task: None });
        };

        let mut task: Task = serde_json::from_str(&document)?;
        if !filter.matches(&task) {
            tx.commit().await.map_err(map_sqlx_error)?;
            return Ok(UpdateResult { task: None });
        }

        update.apply(&mut task);
        let now = now_rfc3339();

        let written = sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?, document = ?, version = version + 1, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(task.status.as_str())
        .bind(serde_json::to_string(&task)?)
        .bind(&now)
        .bind(filter.id.to_key())
        .bind(version)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if written.rows_affected() == 0 {
            warn!(task_id = %filter.id, version, "version moved under the write lock; no match");
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(UpdateResult { task: None });
        }

        sqlx::query(
            r#"
            INSERT INTO task_changes (task_id, operation, updated_fields, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(filter.id.to_key())
        .bind(OperationKind::Update.as_str())
        .bind(serde_json::to_string(&update.updated_fields())?)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(UpdateResult { task: Some(task) })
    }

    async fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeStream, StoreError> {
        let cursor: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) FROM task_changes")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        debug!(cursor, "opened task_changes subscription");

        let state = ChangePoller {
            pool: self.pool.clone(),
            cursor,
            filter,
            interval: self.poll_interval,
            buffer: VecDeque::new(),
            finished: false,
        };

        Ok(futures::stream::unfold(state, ChangePoller::next).boxed())
    }
}

/// Cursor over `task_changes`.
struct ChangePoller {
    pool: SqlitePool,
    cursor: i64,
    filter: ChangeFilter,
    interval: Duration,
    buffer: VecDeque<ChangeEvent>,
    finished: bool,
}

impl ChangePoller {
    async fn next(mut self) -> Option<(Result<ChangeEvent, StoreError>, Self)> {
        if self.finished {
            return None;
        }
        loop {
            if let Some(event) = self.buffer.pop_front() {
                return Some((Ok(event), self));
            }
            if let Err(e) = self.poll().await {
                // one error, then the stream ends
                self.finished = true;
                let err = match map_sqlx_error(e) {
                    StoreError::Connection(reason) => StoreError::Connection(reason),
                    other => StoreError::Connection(format!("change poll failed: {other}")),
                };
                return Some((Err(err), self));
            }
            if self.buffer.is_empty() {
                tokio::time::sleep(self.interval).await;
            }
        }
    }

    async fn poll(&mut self) -> Result<(), sqlx::Error> {
        let rows: Vec<(i64, Option<String>, String, String)> = sqlx::query_as(
            r#"
            SELECT seq, task_id, operation, updated_fields
            FROM task_changes
            WHERE seq > ?
            ORDER BY seq
            "#,
        )
        .bind(self.cursor)
        .fetch_all(&self.pool)
        .await?;

        for (seq, task_id, operation, updated_fields) in rows {
            self.cursor = seq;

            let operation = match operation.parse::<OperationKind>() {
                Ok(op) => op,
                Err(e) => {
                    warn!(seq, error = %e, "skipping change row with unknown operation");
                    continue;
                }
            };
            if !self.filter.matches(operation) {
                continue;
            }

            // an unparsable id is surfaced as a malformed event
            let task_id = task_id.and_then(|raw| raw.parse::<TaskId>().ok());
            let updated_fields = serde_json::from_str(&updated_fields).unwrap_or_default();

            self.buffer.push_back(ChangeEvent {
                task_id,
                operation,
                updated_fields,
            });
        }
        Ok(())
    }
}
