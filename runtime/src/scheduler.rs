//! Background jobs: expiry, review escalation and event retention.
//!
//! The Lifecycle Manager never expires anything by itself; these jobs scan
//! storage on an interval and call back into the manager, so every change
//! still goes through the triple-write.

use crate::lifecycle::LifecycleManager;
use crate::metrics::SchedulerMetrics;
use intake_core::error::Result;
use intake_core::state_machine::SubmissionState;
use intake_core::submission_store::{Pagination, SubmissionFilter};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Background job settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Time between two scans.
    pub scan_interval: Duration,
    /// Submissions handled per scan.
    pub batch_size: usize,
    /// Events older than this are purged; `None` keeps them forever.
    pub event_retention: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            batch_size: 100,
            event_retention: None,
        }
    }
}

/// What one scan did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Submissions examined.
    pub scanned: usize,
    /// Submissions moved to `expired`.
    pub expired: usize,
    /// Reviews escalated.
    pub escalated: usize,
    /// Events purged by retention.
    pub purged: u64,
    /// Submissions whose update failed; retried on the next scan.
    pub failed: usize,
}

/// Runs the periodic jobs against a [`LifecycleManager`].
pub struct LifecycleScheduler {
    manager: Arc<LifecycleManager>,
    config: SchedulerConfig,
}

impl LifecycleScheduler {
    /// Create a scheduler.
    #[must_use]
    pub const fn new(manager: Arc<LifecycleManager>, config: SchedulerConfig) -> Self {
        Self { manager, config }
    }

    /// Expire live submissions whose TTL elapsed.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the submissions cannot be listed. Failures of
    /// individual submissions are logged and counted instead.
    pub async fn expire_due(&self) -> Result<ScanReport> {
        let start = Instant::now();
        let now = self.manager.clock().now();
        let due = self
            .manager
            .list(
                SubmissionFilter::all().live().expiring_by(now),
                Pagination::first(self.config.batch_size),
            )
            .await?;

        let mut report = ScanReport {
            scanned: due.len(),
            ..ScanReport::default()
        };
        for submission in due {
            match self.manager.expire(&submission.id).await {
                Ok(true) => report.expired += 1,
                Ok(false) => {}
                Err(error) => {
                    report.failed += 1;
                    tracing::warn!(
                        submission_id = %submission.id,
                        error = %error,
                        "Failed to expire submission"
                    );
                }
            }
        }

        SchedulerMetrics::record_scan("expiry", start.elapsed());
        if report.expired > 0 || report.failed > 0 {
            tracing::info!(
                expired = report.expired,
                failed = report.failed,
                "Expiry scan finished"
            );
        }
        Ok(report)
    }

    /// Escalate reviews whose gate escalation delay elapsed.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the submissions cannot be listed.
    pub async fn escalate_overdue(&self) -> Result<ScanReport> {
        let start = Instant::now();
        let mut report = ScanReport::default();
        let mut offset = 0;

        loop {
            let page = self
                .manager
                .list(
                    SubmissionFilter::all().in_states([SubmissionState::NeedsReview]),
                    Pagination::new(offset, self.config.batch_size),
                )
                .await?;
            let fetched = page.len();
            report.scanned += fetched;

            for submission in page {
                match self.manager.escalate(&submission.id).await {
                    Ok(true) => report.escalated += 1,
                    Ok(false) => {}
                    Err(error) => {
                        report.failed += 1;
                        tracing::warn!(
                            submission_id = %submission.id,
                            error = %error,
                            "Failed to escalate review"
                        );
                    }
                }
            }

            if fetched < self.config.batch_size || self.config.batch_size == 0 {
                break;
            }
            offset += fetched;
        }

        SchedulerMetrics::record_scan("escalation", start.elapsed());
        Ok(report)
    }

    /// Purge events older than the configured retention.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the Event Log fails.
    pub async fn purge_expired_events(&self) -> Result<u64> {
        let Some(retention) = self.config.event_retention else {
            return Ok(0);
        };
        let start = Instant::now();
        let threshold = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let purged = self.manager.purge_events(threshold).await?;
        SchedulerMetrics::record_scan("retention", start.elapsed());
        Ok(purged)
    }

    /// Run every job once.
    ///
    /// # Errors
    ///
    /// Returns the first job-level failure.
    pub async fn run_once(&self) -> Result<ScanReport> {
        let expiry = self.expire_due().await?;
        let escalation = self.escalate_overdue().await?;
        let purged = self.purge_expired_events().await?;
        Ok(ScanReport {
            scanned: expiry.scanned + escalation.scanned,
            expired: expiry.expired,
            escalated: escalation.escalated,
            purged,
            failed: expiry.failed + escalation.failed,
        })
    }

    /// Run the jobs on the configured interval until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.scan_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            interval_ms = self.config.scan_interval.as_millis(),
            "Lifecycle scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.run_once().await {
                        tracing::error!(error = %error, "Scheduled scan failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Lifecycle scheduler stopped");
    }
}
