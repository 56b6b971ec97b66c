// Built-in maintenance jobs
//
// - daily-batch: decay stale confidence, then prune low-confidence triples
// - weekly-reevaluation: merge duplicate groups, then prune
// - monthly-archive: move long-untouched low-confidence triples to the archive
// - health-check: probe the store (read-only)

use super::{JobError, JobHandler, JobReport};
use crate::config::{DAILY_BATCH, HEALTH_CHECK, MONTHLY_ARCHIVE, WEEKLY_REEVALUATION};
use crate::quality::QualityEngine;
use crate::storage::TripleStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

pub struct DailyBatchJob {
    engine: Arc<QualityEngine>,
}

impl DailyBatchJob {
    pub fn new(engine: Arc<QualityEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl JobHandler for DailyBatchJob {
    fn name(&self) -> &str {
        DAILY_BATCH
    }

    async fn run(&self) -> Result<JobReport, JobError> {
        let start = Instant::now();
        let config = self.engine.config().clone();
        let processed = self.engine.store().count().await?;

        let decayed = self
            .engine
            .decay_outdated(config.stale_days, config.decay_rate)
            .await?;
        let deleted = self
            .engine
            .delete_low_confidence(config.low_confidence_threshold)
            .await?;

        tracing::info!("Daily batch: {} decayed, {} deleted", decayed, deleted);
        Ok(JobReport {
            processed,
            changed: decayed + deleted,
            duration: start.elapsed(),
            ..Default::default()
        })
    }
}

pub struct WeeklyReevaluationJob {
    engine: Arc<QualityEngine>,
}

impl WeeklyReevaluationJob {
    pub fn new(engine: Arc<QualityEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl JobHandler for WeeklyReevaluationJob {
    fn name(&self) -> &str {
        WEEKLY_REEVALUATION
    }

    async fn run(&self) -> Result<JobReport, JobError> {
        let start = Instant::now();
        let processed = self.engine.store().count().await?;

        let (groups, removed, failures) = self.engine.merge_all_duplicates().await?;
        let deleted = self
            .engine
            .delete_low_confidence(self.engine.config().low_confidence_threshold)
            .await?;

        tracing::info!(
            "Weekly re-evaluation: {} group(s) merged ({} removed), {} deleted, {} failed merge(s)",
            groups,
            removed,
            deleted,
            failures
        );
        Ok(JobReport {
            processed,
            changed: removed + deleted,
            duration: start.elapsed(),
            errors: failures,
            error_message: None,
        })
    }
}

pub struct MonthlyArchiveJob {
    engine: Arc<QualityEngine>,
}

impl MonthlyArchiveJob {
    pub fn new(engine: Arc<QualityEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl JobHandler for MonthlyArchiveJob {
    fn name(&self) -> &str {
        MONTHLY_ARCHIVE
    }

    async fn run(&self) -> Result<JobReport, JobError> {
        let start = Instant::now();
        let processed = self.engine.store().count().await?;
        let archived = self.engine.archive_stale().await?;

        Ok(JobReport {
            processed,
            changed: archived,
            duration: start.elapsed(),
            ..Default::default()
        })
    }
}

pub struct HealthCheckJob {
    store: Arc<dyn TripleStore>,
}

impl HealthCheckJob {
    pub fn new(store: Arc<dyn TripleStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl JobHandler for HealthCheckJob {
    fn name(&self) -> &str {
        HEALTH_CHECK
    }

    fn mutates_triples(&self) -> bool {
        false
    }

    async fn run(&self) -> Result<JobReport, JobError> {
        let start = Instant::now();
        self.store.ping().await?;
        let processed = self.store.count().await?;
        tracing::debug!("Health check: store reachable, {} triple(s)", processed);

        Ok(JobReport {
            processed,
            duration: start.elapsed(),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::config::{AppConfig, QualityConfig};
    use crate::scheduler::{JobScheduler, JobStatus};
    use crate::storage::test_utils::{create_test_store, seed};
    use crate::storage::LibsqlStore;
    use crate::types::NewTriple;
    use chrono::{Duration as ChronoDuration, Utc};
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Arc<LibsqlStore>, Arc<QualityEngine>) {
        let (dir, store) = create_test_store().await;
        let store = Arc::new(store);
        let engine = Arc::new(QualityEngine::new(
            store.clone(),
            Arc::new(Cache::disabled()),
            QualityConfig::default(),
        ));
        (dir, store, engine)
    }

    #[tokio::test]
    async fn test_daily_batch_decays_then_prunes() {
        let (_dir, store, engine) = setup().await;
        let old = Utc::now() - ChronoDuration::days(120);
        // 0.35 decays to 0.25 and is then pruned
        store
            .insert_at(&NewTriple::new("company:a", "supplies", "company:b", 0.35), old, old)
            .await
            .unwrap();
        let kept = seed(&store, "company:c", "supplies", "company:d", 0.8).await;

        let report = DailyBatchJob::new(engine).run().await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.changed, 2);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.get(kept.id).await.unwrap(), kept);
    }

    #[tokio::test]
    async fn test_weekly_reevaluation_merges_and_prunes() {
        let (_dir, store, engine) = setup().await;
        seed(&store, "company:a", "supplies", "company:b", 0.6).await;
        seed(&store, "Company:A", "supplies", "company:b ", 0.7).await;
        seed(&store, "company:x", "owns", "company:y", 0.1).await;

        let report = WeeklyReevaluationJob::new(engine).run().await.unwrap();
        assert_eq!(report.changed, 2);
        assert_eq!(report.errors, 0);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_monthly_archive_moves_stale_low_confidence() {
        let (_dir, store, engine) = setup().await;
        let ancient = Utc::now() - ChronoDuration::days(400);
        store
            .insert_at(&NewTriple::new("company:a", "supplies", "company:b", 0.2), ancient, ancient)
            .await
            .unwrap();
        store
            .insert_at(&NewTriple::new("company:c", "supplies", "company:d", 0.9), ancient, ancient)
            .await
            .unwrap();
        seed(&store, "company:e", "supplies", "company:f", 0.2).await;

        let report = MonthlyArchiveJob::new(engine).run().await.unwrap();
        assert_eq!(report.changed, 1);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_health_check_is_read_only() {
        let (_dir, store, _engine) = setup().await;
        seed(&store, "company:a", "supplies", "company:b", 0.1).await;

        let job = HealthCheckJob::new(store.clone());
        assert!(!job.mutates_triples());
        let report = job.run().await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.changed, 0);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_default_registry() {
        let (_dir, _store, engine) = setup().await;
        let scheduler =
            JobScheduler::with_default_jobs(
                engine,
                &AppConfig::default(),
                Arc::new(Cache::disabled()),
            )
                .unwrap();

        let jobs = scheduler.get_job_status(None).await.unwrap();
        let names: Vec<&str> = jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(
            names,
            vec![DAILY_BATCH, HEALTH_CHECK, MONTHLY_ARCHIVE, WEEKLY_REEVALUATION]
        );
        let health = jobs.iter().find(|j| j.name == HEALTH_CHECK).unwrap();
        assert!(!health.enabled);

        let run = scheduler.run_job_manually(HEALTH_CHECK).await.unwrap();
        assert_eq!(run.status, JobStatus::Success);
    }
}
