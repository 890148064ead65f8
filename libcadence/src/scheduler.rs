//! Periodic task driver
//!
//! Jobs are registered explicitly at construction. Each job runs on its own
//! interval; a cycle that overruns delays the next tick rather than bursting
//! to catch up. Task errors are logged and the loop carries on.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::tasks::Task;

pub struct ScheduledJob {
    task: Arc<dyn Task>,
    interval: Duration,
}

impl ScheduledJob {
    pub fn new(task: Arc<dyn Task>, interval: Duration) -> Self {
        Self {
            task,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn name(&self) -> &str {
        self.task.name()
    }
}

/// Sending half of a shutdown signal; safe to use from a non-async thread
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been triggered
    pub async fn wait(&mut self) {
        // an Err means every trigger was dropped, which also ends the wait
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx: Arc::new(tx) }, Shutdown { rx })
}

pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
}

impl Scheduler {
    pub fn new(jobs: Vec<ScheduledJob>) -> Self {
        Self { jobs }
    }

    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }

    /// Run every job once, in registration order.
    ///
    /// Returns the number of jobs that failed.
    pub async fn run_once(&self) -> usize {
        let mut failures = 0;
        for job in &self.jobs {
            if !run_job(job).await {
                failures += 1;
            }
        }
        failures
    }

    /// Drive all jobs until `shutdown` fires. Cycles already running finish first.
    pub async fn run(&self, shutdown: Shutdown) {
        info!(jobs = self.jobs.len(), "Scheduler started");

        let loops = self.jobs.iter().map(|job| {
            let mut shutdown = shutdown.clone();
            async move {
                let mut ticker = interval(job.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown.wait() => break,
                        _ = ticker.tick() => {
                            run_job(job).await;
                        }
                    }
                    if shutdown.is_triggered() {
                        break;
                    }
                }
                debug!(job = job.name(), "Job loop stopped");
            }
        });
        futures::future::join_all(loops).await;

        info!("Scheduler stopped");
    }
}

async fn run_job(job: &ScheduledJob) -> bool {
    match job.task.tick().await {
        Ok(summary) => {
            debug!(job = job.name(), "Cycle complete: {}", summary);
            true
        }
        Err(e) => {
            error!(job = job.name(), "Cycle failed: {}", e);
            false
        }
    }
}
