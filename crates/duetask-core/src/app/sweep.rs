//! ReconciliationSweep - 正本から overdue を再導出して直す
//!
//! # フロー
//! 1. TaskStore::query(TaskFilter::overdue(now)) で `status != DONE and due <= now` を取得
//! 2. 各タスクに transition() を時間制限付きで実行（順序は保証しない）
//! 3. Transitioned を数える。タスク単位の StoreError はログに残して続行
//!
//! 取りこぼしたワンショットジョブはすべてここで回収される。

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::StatusTransition;
use super::transition::DEFAULT_TRANSITION_TIMEOUT;
use crate::domain::{TaskId, TransitionOutcome};
use crate::ports::{Clock, StoreError, TaskFilter, TaskStore};

/// Tally of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub transitioned: usize,
    pub already_done: usize,
    pub not_yet_due: usize,
    pub not_found: usize,
    /// Tasks whose transition hit a store error; the next pass retries them.
    pub failed: Vec<TaskId>,
}

impl SweepReport {
    fn record(&mut self, outcome: TransitionOutcome) {
        match outcome {
            TransitionOutcome::Transitioned => self.transitioned += 1,
            TransitionOutcome::AlreadyDone => self.already_done += 1,
            TransitionOutcome::NotYetDue => self.not_yet_due += 1,
            TransitionOutcome::NotFound => self.not_found += 1,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Clone)]
pub struct ReconciliationSweep {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    transition: StatusTransition,
    time_limit: Duration,
}

impl ReconciliationSweep {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>) -> Self {
        let transition = StatusTransition::new(store.clone(), clock.clone());
        Self {
            store,
            clock,
            transition,
            time_limit: DEFAULT_TRANSITION_TIMEOUT,
        }
    }

    /// Per-task transition limit; an overrun lands in `SweepReport::failed`.
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = limit;
        self
    }

    /// Transition every overdue task; returns how many moved to DONE.
    pub async fn sweep(&self) -> Result<usize, StoreError> {
        self.sweep_at(self.clock.now()).await.map(|report| report.transitioned)
    }

    /// One pass over the tasks that are overdue at `now`.
    ///
    /// Only the initial query can fail the whole pass.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let overdue = self.store.query(&TaskFilter::overdue(now)).await?;
        let mut report = SweepReport {
            examined: overdue.len(),
            ..SweepReport::default()
        };

        for task in overdue {
            match self.transition.transition_within(task.id, self.time_limit).await {
                Ok(outcome) => report.record(outcome),
                Err(err) => {
                    tracing::warn!(task_id = %task.id, error = %err, kind = %err.kind(), "transition failed during sweep");
                    report.failed.push(task.id);
                }
            }
        }

        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                transitioned = report.transitioned,
                failed = report.failed.len(),
                "reconciliation sweep finished"
            );
        } else {
            tracing::debug!("reconciliation sweep found nothing overdue");
        }
        Ok(report)
    }
}
