// SPDX-License-Identifier: GPL-3.0-or-later
pub mod job;
pub mod jobs;
pub mod registry;

use anyhow::Result;
use registry::JobRegistry;
use spotsync_application::SyncServices;
use spotsync_config::SchedulerConfig;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use jobs::{PlaylistMonitorJob, ReconcileSweepJob};

pub struct Scheduler {
    config: SchedulerConfig,
    services: SyncServices,
    registry: Arc<JobRegistry>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, services: SyncServices) -> Self {
        let registry = Arc::new(JobRegistry::new(config.max_concurrent_jobs));
        Self {
            config,
            services,
            registry,
        }
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        self.registry.clone()
    }

    /// Register all background jobs with their schedules
    pub async fn register_jobs(&self) {
        info!(target: "scheduler", "registering background jobs");

        self.registry
            .register(
                "reconcile-sweep",
                ReconcileSweepJob::new(self.services.processor.clone()),
                Schedule::Interval(self.config.reconcile_interval_secs),
            )
            .await;

        self.registry
            .register(
                "playlist-monitor",
                PlaylistMonitorJob::new(self.services.playlists.clone()),
                Schedule::Interval(self.config.playlist_interval_secs),
            )
            .await;

        info!(target: "scheduler", "all jobs registered");
    }

    /// Start the scheduler and return a handle to the background task
    pub fn start(self) -> JoinHandle<Result<()>> {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            registry.start().await;
            Ok(())
        })
    }
}

pub use job::{Job, JobContext, JobResult};
pub use registry::Schedule;
