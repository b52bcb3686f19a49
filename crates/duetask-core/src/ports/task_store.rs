//! TaskStore port - タスクレコードの正本（source of truth）
//!
//! TaskStore は以下を提供します：
//! - point lookup（load）
//! - 単一レコードの status のアトミック更新（update_status）
//! - status / due date による範囲クエリ（query）
//! - CRUD 層向けの upsert / 部分更新 / delete（save / patch / delete）
//!
//! # 設計原則
//! - スケジューラは永続状態を持たない。回復はすべて `(status, due_date)` から再導出する
//! - 接続は操作ごとに取得・解放する（エラー経路でも必ず解放）

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::domain::{DueDate, ErrorKind, Task, TaskId, TaskStatus};

/// StoreError はストア側の障害
///
/// ビジネス上の結果（未存在・期限前など）はここに含めない。
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("task store unavailable: {0}")]
    Unavailable(String),

    #[error("task store backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("invalid persisted task data: {0}")]
    InvalidData(String),

    #[error("task store call exceeded {0:?}")]
    TimedOut(Duration),
}

impl StoreError {
    pub fn backend(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::Backend {
            source: Box::new(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Unavailable(_) | StoreError::TimedOut(_) => ErrorKind::Transient,
            StoreError::Backend { .. } => ErrorKind::Infrastructure,
            StoreError::InvalidData(_) => ErrorKind::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Query filter over task records. Unset fields match everything.
///
/// Due dates are compared after UTC normalization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub exclude_status: Option<TaskStatus>,
    pub due_at_or_before: Option<DateTime<Utc>>,
}

impl TaskFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// `status != DONE and due_date <= now`
    pub fn overdue(now: DateTime<Utc>) -> Self {
        Self {
            status: None,
            exclude_status: Some(TaskStatus::Done),
            due_at_or_before: Some(now),
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status
            && task.status != status
        {
            return false;
        }
        if let Some(excluded) = self.exclude_status
            && task.status == excluded
        {
            return false;
        }
        if let Some(cutoff) = self.due_at_or_before
            && task.due_at_utc() > cutoff
        {
            return false;
        }
        true
    }
}

/// Field-level edit of one record. `None` fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub due_date: Option<DueDate>,
    pub status: Option<TaskStatus>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TaskPatch {
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(due) = self.due_date {
            task.due_date = due;
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(at) = self.updated_at {
            task.updated_at = Some(at);
        }
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn load(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Insert or replace a whole record (CRUD layer).
    async fn save(&self, task: &Task) -> Result<(), StoreError>;

    /// Atomically set `status` on one record. Returns `false` when the record
    /// no longer exists.
    async fn update_status(&self, id: TaskId, status: TaskStatus) -> Result<bool, StoreError>;

    /// Write only the fields set in `patch`, in one atomic step, and return
    /// the record as stored afterwards. `None` when the record does not exist.
    async fn patch(&self, id: TaskId, patch: &TaskPatch) -> Result<Option<Task>, StoreError>;

    async fn delete(&self, id: TaskId) -> Result<bool, StoreError>;

    /// Matching records in no particular order.
    async fn query(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError>;
}
