//! DelayQueue port - 遅延実行のためのタイマー / キュー
//!
//! DelayQueue は `(task_id, fire_at)` だけを流します（状態は TaskStore に置く）。
//!
//! # 設計原則
//! - fire_at が過去のジョブは捨てずに即座に取り出せる
//! - 遅延の上限はない（数ヶ月先でもよい）
//! - キャンセルはしない。古いジョブは transition 側で no-op になる
//! - close 後の push は失敗する（＝ facility unavailable）

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::{ErrorKind, ScheduledJob};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("delay queue is closed")]
    Closed,

    #[error("delay queue operation failed: {0}")]
    OperationFailed(String),
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::Closed => ErrorKind::Permanent,
            QueueError::OperationFailed(_) => ErrorKind::Transient,
        }
    }
}

#[async_trait]
pub trait DelayQueue: Send + Sync {
    async fn push(&self, job: ScheduledJob) -> Result<(), QueueError>;

    /// `fire_at` に到達したジョブを 1 件取り出す。`timeout` 内に無ければ `None`。
    async fn pop_due(&self, timeout: Duration) -> Result<Option<ScheduledJob>, QueueError>;

    /// Jobs waiting, due or not.
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop accepting and handing out jobs. Waiting `pop_due` calls return
    /// `QueueError::Closed`.
    fn close(&self);
}
