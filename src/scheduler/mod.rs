// Background Job Scheduler
//
// Runs a fixed registry of maintenance jobs on cron schedules. Each job has
// its own tick task; runs of the same job are serialized, bounded by a
// timeout and recorded in a short in-memory history. Failures never escape
// a run, they are captured in the job's status.

pub mod jobs;
pub mod schedule;

pub use jobs::{DailyBatchJob, HealthCheckJob, MonthlyArchiveJob, WeeklyReevaluationJob};
pub use schedule::{CronSchedule, ScheduleError};

use crate::cache::Cache;
use crate::config::{default_jobs, AppConfig, JobConfig};
use crate::error::{QualityError, Result};
use crate::quality::QualityEngine;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Number of runs kept per job
pub const HISTORY_LIMIT: usize = 20;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("Job execution failed: {0}")]
    ExecutionError(String),

    #[error(transparent)]
    Quality(#[from] QualityError),
}

/// Report generated after job execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    /// Number of triples examined
    pub processed: usize,

    /// Number of triples changed, merged, deleted or archived
    pub changed: usize,

    /// Duration of job execution
    #[serde(rename = "durationMs", with = "serde_duration_millis")]
    pub duration: Duration,

    /// Number of non-fatal errors encountered
    pub errors: usize,

    /// Error message if the job failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

// Durations are serialized as milliseconds
mod serde_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// A maintenance job the scheduler can run
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Registry name
    fn name(&self) -> &str;

    /// Whether runs can change triple state (and so stale cached views)
    fn mutates_triples(&self) -> bool {
        true
    }

    async fn run(&self) -> std::result::Result<JobReport, JobError>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Failed,
    Timeout,
}

/// What started a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Schedule,
    Manual,
}

/// Job execution record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRun {
    pub id: String,
    pub job_name: String,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: JobStatus,
    pub report: JobReport,
}

/// Externally visible state of one job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub name: String,
    pub schedule: String,
    pub enabled: bool,
    pub running: bool,
    pub run_count: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_status: Option<JobStatus>,
    pub last_error: Option<String>,
    pub history: Vec<JobRun>,
}

#[derive(Debug, Default)]
struct JobState {
    running: bool,
    run_count: u64,
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
    last_status: Option<JobStatus>,
    last_error: Option<String>,
    history: VecDeque<JobRun>,
}

struct ScheduledJob {
    handler: Arc<dyn JobHandler>,
    schedule: CronSchedule,
    max_duration: Duration,
    enabled: AtomicBool,
    run_lock: Mutex<()>,
    state: RwLock<JobState>,
}

impl ScheduledJob {
    fn name(&self) -> &str {
        self.handler.name()
    }

    async fn info(&self) -> JobInfo {
        let state = self.state.read().await;
        let enabled = self.enabled.load(Ordering::SeqCst);
        JobInfo {
            name: self.name().to_string(),
            schedule: self.schedule.to_string(),
            enabled,
            running: state.running,
            run_count: state.run_count,
            last_run: state.last_run,
            // Disabled jobs have no upcoming run
            next_run: state.next_run.filter(|_| enabled),
            last_status: state.last_status,
            last_error: state.last_error.clone(),
            history: state.history.iter().cloned().collect(),
        }
    }

    /// Manual run, waiting for any in-flight run of this job to finish first
    async fn run_manual(&self, cache: &Cache) -> JobRun {
        let _guard = self.run_lock.lock().await;
        self.run_locked(cache, Trigger::Manual).await
    }

    /// Scheduled run; dropped if the job was disabled while waiting for the lock
    async fn tick(&self, cache: &Cache) -> Option<JobRun> {
        let _guard = self.run_lock.lock().await;
        if !self.enabled.load(Ordering::SeqCst) {
            debug!("Job {} is disabled, skipping tick", self.name());
            return None;
        }
        Some(self.run_locked(cache, Trigger::Schedule).await)
    }

    /// Caller holds `run_lock`
    async fn run_locked(&self, cache: &Cache, trigger: Trigger) -> JobRun {
        let job_name = self.name().to_string();
        let job_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let clock = std::time::Instant::now();

        self.state.write().await.running = true;
        info!("Starting job {} (id: {}, trigger: {:?})", job_name, job_id, trigger);

        // Spawned so a panicking handler is reported instead of unwinding here
        let handler = self.handler.clone();
        let mut task = tokio::spawn(async move { handler.run().await });

        let (status, report) = match timeout(self.max_duration, &mut task).await {
            Ok(Ok(Ok(report))) => {
                info!(
                    "Job {} completed: {} of {} triple(s) changed in {:?}",
                    job_name, report.changed, report.processed, report.duration
                );
                (JobStatus::Success, report)
            }
            Ok(Ok(Err(e))) => {
                error!("Job {} failed: {}", job_name, e);
                (JobStatus::Failed, failed_report(clock.elapsed(), e.to_string()))
            }
            Ok(Err(join_error)) => {
                error!("Job {} aborted: {}", job_name, join_error);
                (
                    JobStatus::Failed,
                    failed_report(clock.elapsed(), format!("Job aborted: {}", join_error)),
                )
            }
            Err(_) => {
                task.abort();
                // The run lock stays held until the handler has really stopped
                let _ = (&mut task).await;
                let e = JobError::Timeout(self.max_duration);
                error!("Job {}: {}", job_name, e);
                (JobStatus::Timeout, failed_report(self.max_duration, e.to_string()))
            }
        };

        if self.handler.mutates_triples() {
            let purged = cache.invalidate_triple_views().await;
            debug!("Job {} purged {} cached view(s)", job_name, purged);
        }

        let run = JobRun {
            id: job_id,
            job_name,
            trigger,
            started_at,
            completed_at: Utc::now(),
            status,
            report,
        };

        let mut state = self.state.write().await;
        state.running = false;
        state.run_count += 1;
        state.last_run = Some(started_at);
        state.last_status = Some(status);
        state.last_error = run.report.error_message.clone();
        state.history.push_back(run.clone());
        while state.history.len() > HISTORY_LIMIT {
            state.history.pop_front();
        }

        run
    }
}

fn failed_report(duration: Duration, message: String) -> JobReport {
    JobReport {
        duration,
        errors: 1,
        error_message: Some(message),
        ..Default::default()
    }
}

/// Cron-driven scheduler over a fixed job registry
pub struct JobScheduler {
    jobs: BTreeMap<String, Arc<ScheduledJob>>,
    cache: Arc<Cache>,
    initialized: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl JobScheduler {
    /// Build a scheduler from handlers and their per-job settings
    ///
    /// Handlers without an entry in `jobs` fall back to the default registry.
    pub fn new(
        handlers: Vec<Arc<dyn JobHandler>>,
        jobs: &BTreeMap<String, JobConfig>,
        cache: Arc<Cache>,
    ) -> Result<Self> {
        let defaults = default_jobs();
        let mut registry = BTreeMap::new();

        for handler in handlers {
            let name = handler.name().to_string();
            let config = jobs
                .get(&name)
                .or_else(|| defaults.get(&name))
                .ok_or_else(|| QualityError::Config(format!("No configuration for job {}", name)))?;
            let schedule = CronSchedule::parse(&config.schedule)
                .map_err(|e| QualityError::Config(format!("jobs.{}: {}", name, e)))?;

            registry.insert(
                name,
                Arc::new(ScheduledJob {
                    handler,
                    schedule,
                    max_duration: config.max_duration,
                    enabled: AtomicBool::new(config.enabled),
                    run_lock: Mutex::new(()),
                    state: RwLock::new(JobState::default()),
                }),
            );
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            jobs: registry,
            cache,
            initialized: AtomicBool::new(false),
            shutdown_tx,
        })
    }

    /// Scheduler with the four built-in maintenance jobs
    pub fn with_default_jobs(
        engine: Arc<QualityEngine>,
        config: &AppConfig,
        cache: Arc<Cache>,
    ) -> Result<Self> {
        let handlers: Vec<Arc<dyn JobHandler>> = vec![
            Arc::new(DailyBatchJob::new(engine.clone())),
            Arc::new(WeeklyReevaluationJob::new(engine.clone())),
            Arc::new(MonthlyArchiveJob::new(engine.clone())),
            Arc::new(HealthCheckJob::new(engine.store().clone())),
        ];
        Self::new(handlers, &config.jobs, cache)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn job(&self, name: &str) -> Result<&Arc<ScheduledJob>> {
        self.jobs
            .get(name)
            .ok_or_else(|| QualityError::NotFound(format!("Job {} not found", name)))
    }

    /// Start one tick task per job; a second call is a no-op
    ///
    /// Returns whether this call started the tasks. Must be called from
    /// within a tokio runtime.
    pub async fn initialize(&self) -> bool {
        if self.initialized.swap(true, Ordering::SeqCst) {
            debug!("Scheduler already initialized");
            return false;
        }

        info!("Starting job scheduler with {} job(s)", self.jobs.len());
        for job in self.jobs.values() {
            let job = job.clone();
            let cache = self.cache.clone();
            let mut shutdown_rx = self.shutdown_tx.subscribe();

            tokio::spawn(async move {
                loop {
                    let Some(next) = job.schedule.next_after(Utc::now()) else {
                        warn!("Job {} has no future run time; tick task exiting", job.name());
                        break;
                    };
                    job.state.write().await.next_run = Some(next);
                    let wait = (next - Utc::now()).to_std().unwrap_or_default();

                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            debug!("Tick task for {} received shutdown signal", job.name());
                            break;
                        }
                        _ = sleep(wait) => {}
                    }

                    job.tick(&cache).await;
                }
                job.state.write().await.next_run = None;
            });
        }
        true
    }

    /// Status of one job, or of every job when `name` is `None`
    pub async fn get_job_status(&self, name: Option<&str>) -> Result<Vec<JobInfo>> {
        match name {
            Some(name) => Ok(vec![self.job(name)?.info().await]),
            None => {
                let mut out = Vec::with_capacity(self.jobs.len());
                for job in self.jobs.values() {
                    out.push(job.info().await);
                }
                Ok(out)
            }
        }
    }

    /// Run a job now regardless of its enabled flag
    pub async fn run_job_manually(&self, name: &str) -> Result<JobRun> {
        let job = self.job(name)?;
        Ok(job.run_manual(&self.cache).await)
    }

    /// Enable or disable future scheduled runs; never triggers a run
    pub async fn toggle_job(&self, name: &str, enabled: bool) -> Result<JobInfo> {
        let job = self.job(name)?;
        job.enabled.store(enabled, Ordering::SeqCst);
        info!("Job {} {}", name, if enabled { "enabled" } else { "disabled" });
        Ok(job.info().await)
    }

    /// Disable every job and cancel pending ticks; in-flight runs complete
    pub async fn stop_all(&self) {
        for job in self.jobs.values() {
            job.enabled.store(false, Ordering::SeqCst);
        }
        if self.initialized.swap(false, Ordering::SeqCst) {
            let _ = self.shutdown_tx.send(());
        }
        info!("All scheduled jobs stopped");
    }
}
