//! SqliteTaskStore - SQLite を正本にする TaskStore 実装
//!
//! # 実装詳細
//! - `tasks` テーブル 1 つだけ。スケジューラ固有の永続状態は持たない
//! - `due_date` は呼び出し側が渡した文字列のまま保存し、範囲クエリ用に
//!   UTC ミリ秒（`due_at_ms`）を併せて持つ。ミリ秒は SQL 側の絞り込みにだけ使い、
//!   結果は `TaskFilter::matches` で全精度のまま確定させる
//! - `patch` は指定された列だけを UPDATE する（status を巻き戻さない）
//! - 接続は Mutex の中にあり、各操作は spawn_blocking 上でその操作の間だけ保持する
//! - スキーマは `PRAGMA user_version` で管理する

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::domain::{DueDate, Task, TaskId, TaskStatus};
use crate::ports::{StoreError, TaskFilter, TaskPatch, TaskStore};

const TASK_SELECT_SQL: &str = "SELECT id, title, due_date, status, created_at, updated_at FROM tasks";

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: "CREATE TABLE IF NOT EXISTS tasks (
              id         TEXT PRIMARY KEY NOT NULL,
              title      TEXT NOT NULL,
              due_date   TEXT NOT NULL,
              due_at_ms  INTEGER NOT NULL,
              status     TEXT NOT NULL CHECK (status IN ('pending', 'done')),
              created_at TEXT NOT NULL,
              updated_at TEXT
          );
          CREATE INDEX IF NOT EXISTS idx_tasks_status_due ON tasks (status, due_at_ms);",
}];

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        StoreError::backend(value)
    }
}

#[derive(Clone)]
pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTaskStore {
    /// Open (or create) a database file and apply pending migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        tracing::debug!(path = %path.display(), "opened sqlite task store");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self, StoreError> {
        apply_migrations(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` with the connection on the blocking pool. The lock is held for
    /// exactly this operation and released on every exit path.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("blocking store task failed: {e}")))?
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn load(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!("{TASK_SELECT_SQL} WHERE id = ?1"))?;
            let row = stmt
                .query_row(params![id.as_ulid().to_string()], raw_row)
                .optional()?;
            row.map(RawTask::into_task).transpose()
        })
        .await
    }

    async fn save(&self, task: &Task) -> Result<(), StoreError> {
        let task = task.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO tasks (id, title, due_date, due_at_ms, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (id) DO UPDATE SET
                    title = excluded.title,
                    due_date = excluded.due_date,
                    due_at_ms = excluded.due_at_ms,
                    status = excluded.status,
                    updated_at = excluded.updated_at",
                params![
                    task.id.as_ulid().to_string(),
                    task.title,
                    task.due_date.to_string(),
                    task.due_at_utc().timestamp_millis(),
                    task.status.as_str(),
                    task.created_at.to_rfc3339(),
                    task.updated_at.map(|t| t.to_rfc3339()),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_status(&self, id: TaskId, status: TaskStatus) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE tasks SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id.as_ulid().to_string()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn patch(&self, id: TaskId, patch: &TaskPatch) -> Result<Option<Task>, StoreError> {
        let patch = patch.clone();
        self.with_conn(move |conn| {
            let id = id.as_ulid().to_string();
            let mut sets: Vec<&str> = Vec::new();
            let mut binds: Vec<Value> = Vec::new();

            if let Some(title) = patch.title {
                sets.push("title");
                binds.push(Value::Text(title));
            }
            if let Some(due) = patch.due_date {
                sets.push("due_date");
                binds.push(Value::Text(due.to_string()));
                sets.push("due_at_ms");
                binds.push(Value::Integer(due.to_utc().timestamp_millis()));
            }
            if let Some(status) = patch.status {
                sets.push("status");
                binds.push(Value::Text(status.as_str().to_string()));
            }
            if let Some(at) = patch.updated_at {
                sets.push("updated_at");
                binds.push(Value::Text(at.to_rfc3339()));
            }

            let tx = conn.transaction()?;
            if !sets.is_empty() {
                let assignments: Vec<String> = sets
                    .iter()
                    .enumerate()
                    .map(|(i, column)| format!("{column} = ?{}", i + 1))
                    .collect();
                binds.push(Value::Text(id.clone()));
                let sql = format!(
                    "UPDATE tasks SET {} WHERE id = ?{}",
                    assignments.join(", "),
                    binds.len()
                );
                tx.execute(&sql, params_from_iter(binds))?;
            }
            let row = tx
                .query_row(&format!("{TASK_SELECT_SQL} WHERE id = ?1"), params![id], raw_row)
                .optional()?;
            tx.commit()?;
            row.map(RawTask::into_task).transpose()
        })
        .await
    }

    async fn delete(&self, id: TaskId) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "DELETE FROM tasks WHERE id = ?1",
                params![id.as_ulid().to_string()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn query(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let filter = *filter;
        self.with_conn(move |conn| {
            let mut sql = format!("{TASK_SELECT_SQL} WHERE 1 = 1");
            let mut binds: Vec<Value> = Vec::new();

            if let Some(status) = filter.status {
                binds.push(Value::Text(status.as_str().to_string()));
                sql.push_str(&format!(" AND status = ?{}", binds.len()));
            }
            if let Some(excluded) = filter.exclude_status {
                binds.push(Value::Text(excluded.as_str().to_string()));
                sql.push_str(&format!(" AND status != ?{}", binds.len()));
            }
            if let Some(cutoff) = filter.due_at_or_before {
                binds.push(Value::Integer(cutoff.timestamp_millis()));
                sql.push_str(&format!(" AND due_at_ms <= ?{}", binds.len()));
            }

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(binds), raw_row)?;
            let mut tasks = Vec::new();
            for row in rows {
                let task = row?.into_task()?;
                // due_at_ms はミリ秒で切り捨て済み
                if filter.matches(&task) {
                    tasks.push(task);
                }
            }
            Ok(tasks)
        })
        .await
    }
}

/// Row as stored, before domain validation.
struct RawTask {
    id: String,
    title: String,
    due_date: String,
    status: String,
    created_at: String,
    updated_at: Option<String>,
}

fn raw_row(row: &Row<'_>) -> rusqlite::Result<RawTask> {
    Ok(RawTask {
        id: row.get(0)?,
        title: row.get(1)?,
        due_date: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

impl RawTask {
    fn into_task(self) -> Result<Task, StoreError> {
        let invalid = |what: &str, err: &dyn std::fmt::Display| {
            StoreError::InvalidData(format!("task {}: {what}: {err}", self.id))
        };
        let id: TaskId = self.id.parse().map_err(|e| invalid("id", &e))?;
        let due_date: DueDate = self.due_date.parse().map_err(|e| invalid("due_date", &e))?;
        let status: TaskStatus = self.status.parse().map_err(|e| invalid("status", &e))?;
        let created_at = parse_timestamp(&self.created_at).map_err(|e| invalid("created_at", &e))?;
        let updated_at = self
            .updated_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .map_err(|e| invalid("updated_at", &e))?;

        Ok(Task {
            id,
            title: self.title,
            due_date,
            status,
            created_at,
            updated_at,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

fn apply_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    let current: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let latest = MIGRATIONS.last().map_or(0, |m| m.version);

    if current > latest {
        return Err(StoreError::InvalidData(format!(
            "database schema version {current} is newer than supported {latest}"
        )));
    }
    if current == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        tx.execute_batch(migration.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
    }
    tx.commit()?;
    tracing::info!(from = current, to = latest, "applied task store migrations");
    Ok(())
}
