//! InMemoryDelayQueue - プロセス内の遅延キュー
//!
//! # 実装詳細
//! - BinaryHeap を min-heap として使い、最も早い fire_at を先頭に置く
//! - 待機は Notify（push 時の通知）と sleep（次の fire_at まで）の select
//! - 1 回の sleep は `max_wait` で打ち切り、起きるたびに Clock で再判定する。
//!   数ヶ月先の due date や壁時計のジャンプもこれで扱える
//!
//! プロセスが落ちれば中身は消える。消えたジョブは sweep が回収する。

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{self, AtomicBool};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::domain::ScheduledJob;
use crate::ports::{Clock, DelayQueue, QueueError};

/// Heap entry. `seq` keeps FIFO order between jobs with the same `fire_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    job: ScheduledJob,
    seq: u64,
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering: earlier times have higher priority
        other
            .job
            .fire_at
            .cmp(&self.job.fire_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

pub struct InMemoryDelayQueue<C> {
    state: Mutex<QueueState>,
    notify: Notify,
    closed: AtomicBool,
    clock: C,
    max_wait: Duration,
}

impl<C: Clock> InMemoryDelayQueue<C> {
    pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(60);

    pub fn new(clock: C) -> Self {
        Self::with_max_wait(clock, Self::DEFAULT_MAX_WAIT)
    }

    pub fn with_max_wait(clock: C, max_wait: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            clock,
            max_wait: max_wait.max(Duration::from_millis(1)),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(atomic::Ordering::Acquire)
    }
}

#[async_trait]
impl<C: Clock> DelayQueue for InMemoryDelayQueue<C> {
    async fn push(&self, job: ScheduledJob) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        {
            let mut state = self.state.lock().await;
            let seq = state.next_seq;
            state.next_seq += 1;
            state.heap.push(Entry { job, seq });
        }
        // Notify outside the lock; waiters re-check the heap head
        self.notify.notify_waiters();
        Ok(())
    }

    async fn pop_due(&self, timeout: Duration) -> Result<Option<ScheduledJob>, QueueError> {
        // Instant に足せないほど長い timeout は期限なしとして扱う
        let deadline = Instant::now().checked_add(timeout);
        loop {
            // heap を見る前に登録しておけば、その後の push を取りこぼさない
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() {
                return Err(QueueError::Closed);
            }

            let until_next = {
                let mut state = self.state.lock().await;
                let now = self.clock.now();
                match state.heap.peek().map(|entry| entry.job.fire_at) {
                    Some(fire_at) if now >= fire_at => {
                        return Ok(state.heap.pop().map(|entry| entry.job));
                    }
                    Some(fire_at) => (fire_at - now).to_std().unwrap_or(Duration::ZERO),
                    None => self.max_wait,
                }
            };

            let remaining = deadline.map_or(Duration::MAX, |d| d.saturating_duration_since(Instant::now()));
            if remaining.is_zero() {
                return Ok(None);
            }

            let wait = until_next.min(self.max_wait).min(remaining);
            tokio::select! {
                _ = &mut notified => {},
                _ = tokio::time::sleep(wait) => {},
            }
        }
    }

    async fn len(&self) -> usize {
        self.state.lock().await.heap.len()
    }

    fn close(&self) {
        self.closed.store(true, atomic::Ordering::Release);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskId;
    use crate::ports::AnchoredClock;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Arc;
    use ulid::Ulid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn job_at(fire_at: DateTime<Utc>) -> ScheduledJob {
        ScheduledJob::new(TaskId::from_ulid(Ulid::new()), fire_at)
    }

    #[tokio::test(start_paused = true)]
    async fn past_jobs_fire_immediately() {
        let queue = InMemoryDelayQueue::new(AnchoredClock::new(t0()));
        let job = job_at(t0() - chrono::Duration::days(3));
        queue.push(job).await.unwrap();

        let popped = queue.pop_due(Duration::ZERO).await.unwrap();
        assert_eq!(popped, Some(job));
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn future_job_waits_until_fire_at() {
        let clock = AnchoredClock::new(t0());
        let queue = InMemoryDelayQueue::new(clock);
        let job = job_at(t0() + chrono::Duration::hours(1));
        queue.push(job).await.unwrap();

        let early = queue.pop_due(Duration::from_secs(600)).await.unwrap();
        assert_eq!(early, None);

        let popped = queue.pop_due(Duration::from_secs(7200)).await.unwrap();
        assert_eq!(popped, Some(job));
        assert!(clock.now() >= job.fire_at);
        assert!(clock.now() < job.fire_at + chrono::Duration::seconds(1));
    }

    #[tokio::test(start_paused = true)]
    async fn earliest_fire_at_comes_first() {
        let queue = InMemoryDelayQueue::new(AnchoredClock::new(t0()));
        let late = job_at(t0() - chrono::Duration::minutes(1));
        let early = job_at(t0() - chrono::Duration::hours(1));
        queue.push(late).await.unwrap();
        queue.push(early).await.unwrap();

        assert_eq!(queue.pop_due(Duration::ZERO).await.unwrap(), Some(early));
        assert_eq!(queue.pop_due(Duration::ZERO).await.unwrap(), Some(late));
    }

    #[tokio::test(start_paused = true)]
    async fn push_wakes_pop() {
        let queue = Arc::new(InMemoryDelayQueue::new(AnchoredClock::new(t0())));
        let job = job_at(t0());

        let pop_future = tokio::spawn({
            let queue = queue.clone();
            async move { queue.pop_due(Duration::from_secs(5)).await.unwrap() }
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        queue.push(job).await.unwrap();

        assert_eq!(pop_future.await.unwrap(), Some(job));
    }

    #[tokio::test(start_paused = true)]
    async fn distant_due_dates_are_reached_in_bounded_steps() {
        let clock = AnchoredClock::new(t0());
        let queue = InMemoryDelayQueue::with_max_wait(clock, Duration::from_secs(3600));
        let job = job_at(t0() + chrono::Duration::days(90));
        queue.push(job).await.unwrap();

        let popped = queue
            .pop_due(Duration::from_secs(100 * 24 * 3600))
            .await
            .unwrap();
        assert_eq!(popped, Some(job));
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_timeout_waits_for_the_next_job() {
        let clock = AnchoredClock::new(t0());
        let queue = InMemoryDelayQueue::new(clock);
        let job = job_at(t0() + chrono::Duration::minutes(5));
        queue.push(job).await.unwrap();

        assert_eq!(queue.pop_due(Duration::MAX).await.unwrap(), Some(job));
        assert!(clock.now() >= job.fire_at);
    }

    #[tokio::test(start_paused = true)]
    async fn close_fails_push_and_wakes_waiters() {
        let queue = Arc::new(InMemoryDelayQueue::new(AnchoredClock::new(t0())));

        let waiter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.pop_due(Duration::from_secs(3600)).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();

        assert!(matches!(waiter.await.unwrap(), Err(QueueError::Closed)));
        assert!(matches!(queue.push(job_at(t0())).await, Err(QueueError::Closed)));
    }
}
