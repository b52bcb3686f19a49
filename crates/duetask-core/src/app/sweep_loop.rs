//! SweepLoop - 定期 sweep
//!
//! 起動時に 1 回、その後は `interval` ごとに ReconciliationSweep を回す。
//! `interval` が None なら起動時の 1 回だけ。エラーはログに残して続行する。

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::ReconciliationSweep;

pub struct SweepLoop {
    sweep: ReconciliationSweep,
    interval: Option<Duration>,
}

impl SweepLoop {
    pub fn new(sweep: ReconciliationSweep, interval: Option<Duration>) -> Self {
        Self { sweep, interval }
    }

    pub fn spawn(self, shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown_rx))
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        self.tick("init").await;

        let Some(period) = self.interval else {
            tracing::debug!("periodic sweep disabled");
            return;
        };

        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => self.tick("periodic").await,
            }
        }
        tracing::debug!("sweep loop stopped");
    }

    async fn tick(&self, trigger: &'static str) {
        match self.sweep.sweep().await {
            Ok(transitioned) => tracing::debug!(trigger, transitioned, "sweep tick"),
            Err(err) => tracing::warn!(trigger, error = %err, "sweep failed, will retry next tick"),
        }
    }
}
