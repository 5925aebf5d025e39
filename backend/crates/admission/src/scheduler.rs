//! Queue Maintenance Scheduler
//!
//! Two independent fixed-interval jobs over the shared queue:
//! - timeout sweep every `sweep_interval`
//! - processing-rate recomputation every `check_interval`
//!
//! A failing run is logged and the loop keeps ticking. Any number of
//! instances may run the jobs; both are safe to repeat.

use crate::application::virtual_queue::VirtualQueue;
use crate::domain::repository::QueueRepository;
use platform::store::SharedStore;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

pub struct QueueMaintenanceScheduler;

impl QueueMaintenanceScheduler {
    /// Spawn both jobs on the current runtime.
    pub fn start<R, S>(queue: VirtualQueue<R, S>) -> SchedulerHandle
    where
        R: QueueRepository + Send + Sync + 'static,
        S: SharedStore,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweep_every = queue.config().sweep_interval;
        let rate_every = queue.config().check_interval;

        let sweep = {
            let queue = queue.clone();
            let shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                let queue = &queue;
                run_every(sweep_every, shutdown, "timeout_sweep", move || async move {
                    queue.remove_timeout_users().await.map(|_| ())
                })
                .await;
            })
        };

        let rate = {
            let shutdown = shutdown_rx;
            tokio::spawn(async move {
                let queue = &queue;
                run_every(rate_every, shutdown, "processing_rate", move || async move {
                    queue.update_processing_rate().await.map(|_| ())
                })
                .await;
            })
        };

        tracing::info!(
            sweep_interval_secs = sweep_every.as_secs_f64(),
            check_interval_secs = rate_every.as_secs_f64(),
            "Queue maintenance scheduler started"
        );

        SchedulerHandle {
            shutdown_tx,
            tasks: vec![sweep, rate],
        }
    }
}

async fn run_every<F, Fut, E>(
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    job: &'static str,
    mut run: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the first run waits one period
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tracing::debug!(job, "Running maintenance job");
                if let Err(e) = run().await {
                    tracing::warn!(job, error = %e, "Maintenance job failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::debug!(job, "Maintenance job stopped");
                    return;
                }
            }
        }
    }
}

/// Running scheduler. Dropping it without [`SchedulerHandle::shutdown`]
/// stops the jobs at their next wake-up.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signal both jobs and wait for them to finish their current run.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Maintenance task ended abnormally");
            }
        }
        tracing::info!("Queue maintenance scheduler stopped");
    }
}
