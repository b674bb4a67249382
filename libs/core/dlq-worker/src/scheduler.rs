//! Fixed-interval ticker with an owned stop handle.

use crate::error::ConfigError;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs a callback once per period until stopped.
///
/// The first tick fires one full period after `start`. A callback that
/// overruns the period delays the next tick instead of bursting.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    period: Duration,
}

impl Scheduler {
    pub fn new(period: Duration) -> Result<Self, ConfigError> {
        if period.is_zero() {
            return Err(ConfigError::ZeroPeriod);
        }
        Ok(Self { period })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start ticking with a synchronous callback.
    pub fn start<F>(&self, mut callback: F) -> SchedulerHandle
    where
        F: FnMut() + Send + 'static,
    {
        self.start_async(move || {
            callback();
            std::future::ready(())
        })
    }

    /// Start ticking with an async callback. Each invocation is awaited
    /// before the next tick is taken.
    pub fn start_async<F, Fut>(&self, mut callback: F) -> SchedulerHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let period = self.period;

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(period_ms = period.as_millis() as u64, "Scheduler started");

            let mut ticks: u64 = 0;
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        ticks += 1;
                        debug!(tick = ticks, "Scheduler tick");
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => break,
                            _ = callback() => {}
                        }
                    }
                }
            }

            info!(ticks, "scheduler stopped");
        });

        SchedulerHandle {
            cancel,
            task: Some(task),
        }
    }
}

/// Handle to a running scheduler. Dropping it stops the loop without
/// waiting for it.
#[derive(Debug)]
pub struct SchedulerHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop ticking and wait for the loop to exit. A callback in progress is
    /// abandoned at its next await point.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Scheduler task failed");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Token that stops this scheduler when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
