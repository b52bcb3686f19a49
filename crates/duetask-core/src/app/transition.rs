//! StatusTransition - PENDING → DONE の冪等な遷移
//!
//! # フロー
//! 1. TaskStore::load() でタスクを取得（無ければ NotFound）
//! 2. Clock::now() で UTC の現在時刻を取る
//! 3. due date を UTC に正規化（zone 無しは UTC とみなす）
//! 4. decide() で結果を決める（DONE なら AlreadyDone）
//! 5. Transitioned のときだけ TaskStore::update_status() で 1 回書く
//!
//! 何度呼んでも結果の状態は同じ。重複配送・早すぎる配送はすべて no-op になる。
//! ワーカーと sweep は `transition_within` で時間制限付きで呼ぶ。

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{TaskId, TaskStatus, TransitionOutcome, decide};
use crate::ports::{Clock, StoreError, TaskStore};

/// Time limit for one transition unless configured otherwise.
pub const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(25 * 60);

#[derive(Clone)]
pub struct StatusTransition {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
}

impl StatusTransition {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Business results are `Ok` variants; only store failures are `Err`.
    pub async fn transition(&self, task_id: TaskId) -> Result<TransitionOutcome, StoreError> {
        let Some(task) = self.store.load(task_id).await? else {
            tracing::debug!(%task_id, "task not found, nothing to transition");
            return Ok(TransitionOutcome::NotFound);
        };

        let now = self.clock.now();
        let outcome = decide(task.status, &task.due_date, now);
        if outcome != TransitionOutcome::Transitioned {
            tracing::trace!(%task_id, %outcome, due_at = %task.due_at_utc(), "transition skipped");
            return Ok(outcome);
        }

        // 読んでから消された場合も NotFound 扱い
        if !self.store.update_status(task_id, TaskStatus::Done).await? {
            tracing::debug!(%task_id, "task deleted before status update");
            return Ok(TransitionOutcome::NotFound);
        }

        tracing::info!(
            %task_id,
            due_at = %task.due_at_utc(),
            floating_due_date = task.due_date.is_floating(),
            "task status updated to done"
        );
        Ok(TransitionOutcome::Transitioned)
    }

    /// `transition` bounded by `limit`. An overrun is `StoreError::TimedOut`,
    /// which is retryable; the abandoned call leaves the record as it was or DONE.
    pub async fn transition_within(
        &self,
        task_id: TaskId,
        limit: Duration,
    ) -> Result<TransitionOutcome, StoreError> {
        match tokio::time::timeout(limit, self.transition(task_id)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(%task_id, limit_ms = limit.as_millis() as u64, "transition exceeded its time limit");
                Err(StoreError::TimedOut(limit))
            }
        }
    }
}
