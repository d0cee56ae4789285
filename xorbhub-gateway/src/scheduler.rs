//! Periodic background scheduling
//!
//! One cooperative loop owns a list of [`PeriodicTask`]s, each with its own
//! interval. Due tasks run one at a time in registration order; a failing
//! job is logged and rescheduled like any other.

use crate::metrics;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// A unit of background work
#[async_trait]
pub trait PeriodicJob: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self) -> anyhow::Result<()>;
}

/// A job plus its schedule
pub struct PeriodicTask {
    job: Arc<dyn PeriodicJob>,
    interval: Duration,
    next_due: Instant,
}

impl PeriodicTask {
    /// Due immediately, then every `interval`
    pub fn new(job: Arc<dyn PeriodicJob>, interval: Duration) -> Self {
        Self {
            job,
            interval,
            next_due: Instant::now(),
        }
    }

    /// First run after one full interval
    pub fn delayed(mut self) -> Self {
        self.next_due = Instant::now() + self.interval;
        self
    }

    pub fn name(&self) -> &'static str {
        self.job.name()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_due <= now
    }
}

/// Cooperative loop over periodic tasks
pub struct BackgroundWorker {
    tasks: Vec<PeriodicTask>,
    shutdown: CancellationToken,
}

impl BackgroundWorker {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            tasks: Vec::new(),
            shutdown,
        }
    }

    pub fn with_task(mut self, task: PeriodicTask) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn tasks(&self) -> &[PeriodicTask] {
        &self.tasks
    }

    /// Run every due task once, in order. Returns how many ran.
    pub async fn run_due(&mut self) -> usize {
        let now = Instant::now();
        let mut ran = 0;
        for task in &mut self.tasks {
            if self.shutdown.is_cancelled() {
                break;
            }
            if !task.is_due(now) {
                continue;
            }

            let name = task.job.name();
            let started = Instant::now();
            let ok = match task.job.run().await {
                Ok(()) => {
                    debug!(job = name, elapsed = ?started.elapsed(), "Background job finished");
                    true
                }
                Err(e) => {
                    error!(job = name, error = ?e, "Background job failed");
                    false
                }
            };
            metrics::record_job_run(name, ok, started.elapsed().as_secs_f64());
            task.next_due = Instant::now() + task.interval;
            ran += 1;
        }
        ran
    }

    /// Earliest instant any task becomes due
    fn next_wakeup(&self) -> Option<Instant> {
        self.tasks.iter().map(|t| t.next_due).min()
    }

    /// Loop until the shutdown token is cancelled
    pub async fn run(mut self) {
        info!(
            jobs = ?self.tasks.iter().map(|t| t.name()).collect::<Vec<_>>(),
            "Background worker started"
        );
        loop {
            self.run_due().await;

            let Some(wakeup) = self.next_wakeup() else {
                // nothing scheduled; just wait for shutdown
                self.shutdown.cancelled().await;
                break;
            };
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep_until(wakeup) => {}
            }
        }
        info!("Background worker stopped");
    }

    /// Start the worker as a background task
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
