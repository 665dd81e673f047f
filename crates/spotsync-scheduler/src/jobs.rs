// SPDX-License-Identifier: GPL-3.0-or-later
use crate::job::{Job, JobContext, JobResult};
use anyhow::Result;
use spotsync_application::{PlaylistMonitor, RequestProcessor, SyncError};
use std::sync::Arc;
use tracing::info;

fn failure(err: SyncError) -> JobResult {
    JobResult::Failure {
        retry: err.is_transient(),
        error: err.to_string(),
    }
}

/// Runs one processing tick over every active download request.
pub struct ReconcileSweepJob {
    processor: Arc<RequestProcessor>,
}

impl ReconcileSweepJob {
    pub fn new(processor: Arc<RequestProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait::async_trait]
impl Job for ReconcileSweepJob {
    fn job_type(&self) -> &'static str {
        "reconcile_sweep"
    }

    fn name(&self) -> String {
        "Reconcile Download Requests".to_string()
    }

    async fn execute(&self, ctx: JobContext) -> Result<JobResult> {
        info!(target: "jobs", job_id = %ctx.job_id, "executing reconcile sweep");

        // Per-request failures are already counted in the report; only a
        // failure to list the requests fails the job.
        let report = match self.processor.sweep().await {
            Ok(report) => report,
            Err(e) => return Ok(failure(e)),
        };

        info!(
            target: "jobs",
            job_id = %ctx.job_id,
            processed = report.processed,
            completed = report.completed,
            exhausted = report.exhausted,
            failed = report.failed,
            catalog_reindexed = report.catalog_reindexed,
            "reconcile sweep completed"
        );
        Ok(JobResult::Success)
    }

    fn max_retries(&self) -> u32 {
        2
    }

    fn retry_delay_seconds(&self) -> u64 {
        30
    }
}

/// Checks every monitored playlist and queues its missing tracks.
pub struct PlaylistMonitorJob {
    monitor: Arc<PlaylistMonitor>,
}

impl PlaylistMonitorJob {
    pub fn new(monitor: Arc<PlaylistMonitor>) -> Self {
        Self { monitor }
    }
}

#[async_trait::async_trait]
impl Job for PlaylistMonitorJob {
    fn job_type(&self) -> &'static str {
        "playlist_monitor"
    }

    fn name(&self) -> String {
        "Monitor Playlists".to_string()
    }

    async fn execute(&self, ctx: JobContext) -> Result<JobResult> {
        info!(target: "jobs", job_id = %ctx.job_id, "executing playlist monitor");

        let report = match self.monitor.sweep().await {
            Ok(report) => report,
            Err(e) => return Ok(failure(e)),
        };

        info!(
            target: "jobs",
            job_id = %ctx.job_id,
            checked = report.checked,
            missing = report.missing,
            queued = report.queued,
            skipped = report.skipped,
            failed = report.failed,
            "playlist monitor completed"
        );
        Ok(JobResult::Success)
    }

    fn max_retries(&self) -> u32 {
        1
    }
}
