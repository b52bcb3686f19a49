//! CatchUp - serving プロセス起動前の一括追いつき
//!
//! sweep と同じ処理を、リクエスト受付前に同期的に実行する。
//! `now` は開始時に 1 回だけ取り、最後に再クエリで「overdue が残っていない」ことを確認する。
//! 確認できなければ起動を止める（`CatchUpError`）。

use std::sync::Arc;
use std::time::Duration;

use super::ReconciliationSweep;
use crate::domain::ErrorKind;
use crate::ports::{Clock, StoreError, TaskFilter, TaskStore};

#[derive(Debug, thiserror::Error)]
pub enum CatchUpError {
    #[error("catch-up failed: {0}")]
    Store(#[from] StoreError),

    #[error("catch-up left {remaining} overdue task(s) pending after {passes} pass(es)")]
    Incomplete { remaining: usize, passes: u32 },
}

impl CatchUpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CatchUpError::Store(err) => err.kind(),
            CatchUpError::Incomplete { .. } => ErrorKind::Transient,
        }
    }
}

#[derive(Clone)]
pub struct CatchUp {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    sweep: ReconciliationSweep,
    max_passes: u32,
}

impl CatchUp {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>, max_passes: u32) -> Self {
        let sweep = ReconciliationSweep::new(store.clone(), clock.clone());
        Self {
            store,
            clock,
            sweep,
            max_passes: max_passes.max(1),
        }
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.sweep = self.sweep.with_time_limit(limit);
        self
    }

    /// Returns once no task that was overdue at the start is still PENDING.
    pub async fn catch_up_synchronously(&self) -> Result<usize, CatchUpError> {
        let now = self.clock.now();
        let mut transitioned = 0;

        for pass in 1..=self.max_passes {
            let report = self.sweep.sweep_at(now).await?;
            transitioned += report.transitioned;
            if report.is_clean() {
                break;
            }
            tracing::warn!(pass, failed = report.failed.len(), "catch-up pass left failures, retrying");
        }

        let remaining = self.store.query(&TaskFilter::overdue(now)).await?.len();
        if remaining > 0 {
            return Err(CatchUpError::Incomplete {
                remaining,
                passes: self.max_passes,
            });
        }

        tracing::info!(transitioned, as_of = %now, "startup catch-up complete");
        Ok(transitioned)
    }
}
