//! WorkerLoop - 予約ジョブの実行ループ
//!
//! # フロー
//! 1. DelayQueue::pop_due() で fire_at に達したジョブを取得
//! 2. StatusTransition::transition_within() を実行 → TransitionOutcome
//!    （時間切れは retryable な StoreError::TimedOut）
//! 3. 結果を OutcomeCounts に集計
//! 4. StoreError（retryable）なら RetryPolicy に従って再 push、上限を超えたら捨てる
//!
//! 捨てたジョブは sweep が回収するので、ここでは exactly-once を狙わない。

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::scheduler::retry_fire_at;
use super::transition::DEFAULT_TRANSITION_TIMEOUT;
use super::{RetryPolicy, StatusTransition};
use crate::domain::{ScheduledJob, TransitionOutcome};
use crate::ports::{Clock, DelayQueue, QueueError};

/// Knobs shared by every worker in a group.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub concurrency: usize,
    /// How long one `pop_due` waits before the loop re-checks shutdown.
    pub pop_timeout: Duration,
    /// Limit for one transition call.
    pub transition_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 2,
            pop_timeout: Duration::from_secs(1),
            transition_timeout: DEFAULT_TRANSITION_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// Per-outcome counters, shared by all workers of a group.
#[derive(Debug, Default)]
pub struct OutcomeCounts {
    transitioned: AtomicU64,
    already_done: AtomicU64,
    not_yet_due: AtomicU64,
    not_found: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeSnapshot {
    pub transitioned: u64,
    pub already_done: u64,
    pub not_yet_due: u64,
    pub not_found: u64,
    pub retried: u64,
    pub dropped: u64,
}

impl OutcomeCounts {
    fn record(&self, outcome: TransitionOutcome) {
        let counter = match outcome {
            TransitionOutcome::Transitioned => &self.transitioned,
            TransitionOutcome::AlreadyDone => &self.already_done,
            TransitionOutcome::NotYetDue => &self.not_yet_due,
            TransitionOutcome::NotFound => &self.not_found,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> OutcomeSnapshot {
        OutcomeSnapshot {
            transitioned: self.transitioned.load(Ordering::Relaxed),
            already_done: self.already_done.load(Ordering::Relaxed),
            not_yet_due: self.not_yet_due.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Worker group handle.
/// - `request_shutdown()` で全ワーカーが次のループで止まる
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    counts: Arc<OutcomeCounts>,
}

impl WorkerGroup {
    /// Spawn `settings.concurrency` workers on the current runtime.
    pub fn spawn(
        queue: Arc<dyn DelayQueue>,
        transition: StatusTransition,
        clock: Arc<dyn Clock>,
        settings: WorkerSettings,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counts = Arc::new(OutcomeCounts::default());
        let n = settings.concurrency.max(1);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let worker = Worker {
                id: worker_id,
                queue: Arc::clone(&queue),
                transition: transition.clone(),
                clock: Arc::clone(&clock),
                settings: settings.clone(),
                counts: Arc::clone(&counts),
            };
            let mut rx = shutdown_rx.clone();

            joins.push(tokio::spawn(async move {
                worker.run(&mut rx).await;
            }));
        }

        tracing::info!(workers = n, "worker group started");
        Self {
            shutdown_tx,
            joins,
            counts,
        }
    }

    pub fn stats(&self) -> OutcomeSnapshot {
        self.counts.snapshot()
    }

    /// Receiver that flips to `true` when the group is asked to stop.
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// In-flight transitions finish; no new jobs are taken.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) -> OutcomeSnapshot {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                tracing::error!(error = %err, "worker task panicked");
            }
        }
        self.counts.snapshot()
    }
}

struct Worker {
    id: usize,
    queue: Arc<dyn DelayQueue>,
    transition: StatusTransition,
    clock: Arc<dyn Clock>,
    settings: WorkerSettings,
    counts: Arc<OutcomeCounts>,
}

impl Worker {
    async fn run(&self, shutdown_rx: &mut watch::Receiver<bool>) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            // pop_due は待つので shutdown と競合させる
            let popped = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                popped = self.queue.pop_due(self.settings.pop_timeout) => popped,
            };

            match popped {
                Ok(Some(job)) => self.handle(job).await,
                Ok(None) => continue,
                Err(QueueError::Closed) => break,
                Err(err) => {
                    tracing::warn!(worker = self.id, error = %err, "pop_due failed");
                    tokio::time::sleep(self.settings.pop_timeout).await;
                }
            }
        }
        tracing::debug!(worker = self.id, "worker stopped");
    }

    async fn handle(&self, job: ScheduledJob) {
        let task_id = job.task_id;
        let result = self
            .transition
            .transition_within(task_id, self.settings.transition_timeout)
            .await;
        match result {
            Ok(outcome) => {
                tracing::debug!(worker = self.id, %task_id, %outcome, fire_at = %job.fire_at, "job fired");
                self.counts.record(outcome);
            }
            Err(err) if err.is_retryable() && self.settings.retry.should_retry(job.attempt) => {
                let delay = self.settings.retry.next_delay(job.attempt + 1);
                let retry = job.retry_at(retry_fire_at(self.clock.now(), delay));
                tracing::warn!(
                    worker = self.id,
                    %task_id,
                    attempt = retry.attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %err,
                    "transition failed, retrying"
                );
                if let Err(push_err) = self.queue.push(retry).await {
                    tracing::warn!(%task_id, error = %push_err, "could not re-queue job, leaving it to the sweep");
                    self.counts.dropped.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.counts.retried.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(err) => {
                tracing::error!(
                    worker = self.id,
                    %task_id,
                    attempt = job.attempt,
                    error = %err,
                    "transition failed, dropping job; the sweep will pick the task up"
                );
                self.counts.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
