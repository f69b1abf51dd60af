//! # Scheduler Shim
//!
//! Drives the retry worker from two trigger paths that may fire at the same
//! time:
//!
//! - a primary timer ticking every `interval_seconds`, and
//! - a secondary on-demand trigger (poked on order events) that only runs
//!   when the shared watermark says no sweep happened within the interval.
//!
//! Within a process a single-flight guard keeps sweeps from overlapping;
//! across processes the watermark and per-job claims keep a job from being
//! submitted twice.

use std::sync::Arc;

use chrono::Duration;
use tokio::sync::Mutex;
use tokio::time::{Duration as TokioDuration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::config::SchedulerConfig;
use crate::error::StoreError;
use crate::repositories::SchedulerRunRepository;
use crate::worker::{RetryWorker, SweepReport};

/// Watermark row shared by every trigger path.
pub const SWEEP_WATERMARK: &str = "retry_sweep";

/// What a trigger did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Ran(SweepReport),
    /// Another sweep is running in this process
    Busy,
    /// A sweep ran within the spacing window
    TooSoon,
}

pub struct SchedulerShim {
    worker: Arc<RetryWorker>,
    runs: SchedulerRunRepository,
    interval: TokioDuration,
    in_flight: Mutex<()>,
}

impl SchedulerShim {
    pub fn new(worker: Arc<RetryWorker>, runs: SchedulerRunRepository, config: &SchedulerConfig) -> Self {
        Self {
            worker,
            runs,
            interval: TokioDuration::from_secs(config.interval_seconds),
            in_flight: Mutex::new(()),
        }
    }

    fn spacing(&self) -> Duration {
        Duration::seconds(self.interval.as_secs() as i64)
    }

    /// Timer loop; runs until `shutdown` is cancelled.
    #[instrument(skip_all)]
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(interval_seconds = self.interval.as_secs(), "Starting retry scheduler");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Retry scheduler shutdown requested");
                    break;
                }
                _ = sleep(self.interval) => {
                    if let Err(err) = self.run_primary().await {
                        error!(error = %err, "Scheduled sweep failed");
                    }
                }
            }
        }

        info!("Retry scheduler stopped");
    }

    /// Primary path: sweep unconditionally and advance the watermark.
    pub async fn run_primary(&self) -> Result<TriggerOutcome, StoreError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("Sweep already running; primary tick skipped");
            return Ok(TriggerOutcome::Busy);
        };

        self.runs.touch(SWEEP_WATERMARK).await?;
        self.sweep().await
    }

    /// Secondary path: sweep only when no trigger ran within the interval.
    pub async fn trigger_secondary(&self) -> Result<TriggerOutcome, StoreError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            return Ok(TriggerOutcome::Busy);
        };

        if !self.runs.try_acquire(SWEEP_WATERMARK, self.spacing()).await? {
            debug!("Sweep ran recently; secondary trigger skipped");
            return Ok(TriggerOutcome::TooSoon);
        }

        self.sweep().await
    }

    /// Operator "process now": sweeps regardless of the watermark but still
    /// refuses to overlap a running sweep.
    pub async fn run_manual(&self) -> Result<TriggerOutcome, StoreError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            return Ok(TriggerOutcome::Busy);
        };

        self.runs.touch(SWEEP_WATERMARK).await?;
        self.sweep().await
    }

    async fn sweep(&self) -> Result<TriggerOutcome, StoreError> {
        let started = Instant::now();
        let report = self.worker.sweep().await?;
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Trigger finished");
        Ok(TriggerOutcome::Ran(report))
    }
}
