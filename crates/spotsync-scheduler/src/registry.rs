// SPDX-License-Identifier: GPL-3.0-or-later
use crate::job::{Job, JobContext, JobResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};

/// Job schedule configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Run at fixed intervals (in seconds), first run immediately
    Interval(u64),
    /// Run once immediately, then never again
    Once,
}

struct RegisteredJob {
    job: Arc<dyn Job>,
    schedule: Schedule,
}

/// How one scheduled run of a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub attempts: u32,
    pub succeeded: bool,
}

/// Job registry that manages and executes scheduled jobs
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<String, RegisteredJob>>>,
    max_concurrent: usize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobRegistry {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            max_concurrent: max_concurrent.max(1),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Register a job with its schedule. Registering the same id twice
    /// replaces the earlier job.
    pub async fn register(
        &self,
        job_id: impl Into<String>,
        job: impl Job + 'static,
        schedule: Schedule,
    ) {
        let job_id = job_id.into();
        let registered = RegisteredJob {
            job: Arc::new(job) as Arc<dyn Job>,
            schedule,
        };

        let mut jobs = self.jobs.write().await;
        info!(target: "registry", %job_id, job_type = registered.job.job_type(), "registering job");
        jobs.insert(job_id, registered);
    }

    pub async fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn schedule_of(&self, job_id: &str) -> Option<Schedule> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(|registered| registered.schedule.clone())
    }

    /// Spawn one driver task per registered job and return.
    pub async fn start(self: Arc<Self>) {
        info!(target: "registry", max_concurrent = self.max_concurrent, "starting job registry");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let jobs = self.jobs.read().await;
        let mut handles = self.handles.lock().await;

        for (job_id, registered) in jobs.iter() {
            let job_id = job_id.clone();
            let job = registered.job.clone();
            let semaphore = semaphore.clone();

            let handle = match &registered.schedule {
                Schedule::Interval(seconds) => {
                    let interval_duration = Duration::from_secs((*seconds).max(1));
                    tokio::spawn(async move {
                        let mut ticker = interval(interval_duration);
                        // A sweep that overruns its interval must not be followed by a burst.
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                        loop {
                            ticker.tick().await;
                            let Ok(_permit) = semaphore.clone().acquire_owned().await else {
                                break;
                            };
                            Self::execute_job(&job_id, job.clone()).await;
                        }
                    })
                }
                Schedule::Once => tokio::spawn(async move {
                    if let Ok(_permit) = semaphore.acquire_owned().await {
                        Self::execute_job(&job_id, job).await;
                    }
                }),
            };
            handles.push(handle);
        }

        info!(target: "registry", "job registry started with {} jobs", jobs.len());
    }

    /// Abort every driver task. A job in the middle of an attempt is dropped
    /// at its next await point.
    pub async fn stop(&self) {
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
        info!(target: "registry", "job registry stopped");
    }

    /// Execute a single job with retry logic
    pub async fn execute_job(job_id: &str, job: Arc<dyn Job>) -> RunSummary {
        let mut ctx = JobContext::new(job_id);
        let max_attempts = if job.is_retriable() {
            job.max_retries() + 1
        } else {
            1
        };

        loop {
            info!(
                target: "registry",
                job_id = %job_id,
                job_type = job.job_type(),
                attempt = ctx.attempt,
                max_attempts,
                "executing job"
            );

            let retry = match job.execute(ctx.clone()).await {
                Ok(JobResult::Success) => {
                    info!(
                        target: "registry",
                        job_id = %job_id,
                        job_type = job.job_type(),
                        attempts = ctx.attempt,
                        "job completed successfully"
                    );
                    return RunSummary {
                        attempts: ctx.attempt,
                        succeeded: true,
                    };
                }
                Ok(JobResult::Failure { error, retry }) => {
                    error!(
                        target: "registry",
                        job_id = %job_id,
                        job_type = job.job_type(),
                        attempts = ctx.attempt,
                        %error,
                        retry,
                        "job failed"
                    );
                    retry && job.is_retriable()
                }
                Err(err) => {
                    error!(
                        target: "registry",
                        job_id = %job_id,
                        job_type = job.job_type(),
                        attempts = ctx.attempt,
                        error = %err,
                        "job execution error"
                    );
                    job.is_retriable()
                }
            };

            if !retry || ctx.attempt >= max_attempts {
                if retry {
                    error!(target: "registry", job_id = %job_id, "job exhausted all retry attempts");
                }
                return RunSummary {
                    attempts: ctx.attempt,
                    succeeded: false,
                };
            }

            let delay = Duration::from_secs(job.retry_delay_seconds());
            warn!(target: "registry", job_id = %job_id, ?delay, "retrying job after delay");
            tokio::time::sleep(delay).await;
            ctx = ctx.next_attempt();
        }
    }
}
