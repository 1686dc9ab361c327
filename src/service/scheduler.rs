//! Periodic import/validation runs under one mutual-exclusion guard.
//!
//! A trigger that finds another run in progress is a no-op: it is neither
//! queued nor retried.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use super::history_importer::HistoryImporter;
use super::history_validator::HistoryValidator;

/// Busy flag shared by importer and validator runs.
#[derive(Debug, Default)]
pub struct RunGuard {
    busy: AtomicBool,
}

impl RunGuard {
    /// Creates an idle guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the guard, or returns `None` if a run is in progress.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>) -> Option<RunPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunPermit {
                guard: Arc::clone(self),
            })
    }

    /// Returns `true` while a run holds the guard.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Proof of an in-progress run; releases the guard when dropped.
#[derive(Debug)]
pub struct RunPermit {
    guard: Arc<RunGuard>,
}

impl RunPermit {
    /// Ends the run.
    pub fn release(self) {}
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.guard.busy.store(false, Ordering::Release);
    }
}

/// Job kinds the scheduler triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    /// History import.
    Import,
    /// History validation.
    Validate,
}

/// Runs the importer and validator on their intervals.
#[derive(Debug)]
pub struct TaskScheduler {
    importer: Arc<HistoryImporter>,
    validator: Arc<HistoryValidator>,
    guard: Arc<RunGuard>,
    import_every: Option<Duration>,
    validate_every: Option<Duration>,
}

impl TaskScheduler {
    /// Creates a scheduler; a `None` interval disables that job.
    #[must_use]
    pub fn new(
        importer: Arc<HistoryImporter>,
        validator: Arc<HistoryValidator>,
        guard: Arc<RunGuard>,
        import_every: Option<Duration>,
        validate_every: Option<Duration>,
    ) -> Self {
        Self {
            importer,
            validator,
            guard,
            import_every,
            validate_every,
        }
    }

    /// The shared guard.
    #[must_use]
    pub fn guard(&self) -> &Arc<RunGuard> {
        &self.guard
    }

    /// Runs `job` now unless another run holds the guard.
    ///
    /// Returns `true` if the job ran. Job failures are logged.
    pub async fn trigger(&self, job: Job) -> bool {
        let Some(permit) = self.guard.try_acquire() else {
            tracing::debug!(?job, "previous run still in progress, skipping trigger");
            return false;
        };
        match job {
            Job::Import => match self.importer.import().await {
                Ok(summary) => tracing::info!(
                    pairs = summary.pairs,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    rows = summary.rows,
                    "history import finished"
                ),
                Err(e) => tracing::error!(error = %e, "history import failed"),
            },
            Job::Validate => {
                if let Err(e) = self.validator.validate().await {
                    tracing::error!(error = %e, "history validation failed");
                }
            }
        }
        permit.release();
        true
    }

    /// Ticks both schedules forever.
    pub async fn run(self: Arc<Self>) {
        tokio::join!(
            self.every(self.import_every, Job::Import),
            self.every(self.validate_every, Job::Validate),
        );
    }

    async fn every(&self, period: Option<Duration>, job: Job) {
        let Some(period) = period else {
            tracing::info!(?job, "schedule disabled");
            return;
        };
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.trigger(job).await;
        }
    }
}
