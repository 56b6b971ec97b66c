//! Confidence lifecycle engine
//!
//! Owns every state transition a triple can go through after ingestion:
//! user feedback (approve / reject / adjust), time-based decay, low-confidence
//! pruning, duplicate merging and archiving. Input is validated before the
//! store is touched; the store applies each operation in one transaction.
//! Successful mutations purge the cached views derived from triple state.

pub mod report;

use crate::cache::Cache;
use crate::config::QualityConfig;
use crate::error::{QualityError, Result};
use crate::storage::{MergeOutcome, TripleStore};
use crate::types::{
    validate_confidence, FeedbackAction, FeedbackRecord, NewTriple, Triple, TripleId,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

pub use report::{IssueType, IssuesByType, QualityIssue, QualityReport};

/// Instant `days` days before now, rejecting windows chrono cannot represent
fn days_ago(days: i64) -> Result<DateTime<Utc>> {
    ChronoDuration::try_days(days)
        .and_then(|window| Utc::now().checked_sub_signed(window))
        .ok_or_else(|| {
            QualityError::InvalidRequest(format!("day window out of range: {}", days))
        })
}

/// Result of a feedback call
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackOutcome {
    pub message: String,
    /// Absent after a reject
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triple: Option<Triple>,
}

/// Maintenance actions accepted by the quality API
#[derive(Debug, Clone, PartialEq)]
pub enum QualityAction {
    MergeDuplicates { ids: Vec<TripleId> },
    DeleteLowConfidence { threshold: f64 },
    DecayOutdated { days: i64, rate: f64 },
}

/// Wire form of a quality action request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityActionRequest {
    pub action: String,
    pub triple_ids: Option<Vec<i64>>,
    pub threshold: Option<f64>,
    pub days_threshold: Option<i64>,
    pub decay_rate: Option<f64>,
}

impl QualityAction {
    /// Resolve a request against configured defaults
    pub fn from_request(req: &QualityActionRequest, defaults: &QualityConfig) -> Result<Self> {
        match req.action.as_str() {
            "merge-duplicates" => {
                let ids = req.triple_ids.clone().unwrap_or_default();
                Ok(QualityAction::MergeDuplicates {
                    ids: ids.into_iter().map(TripleId).collect(),
                })
            }
            "delete-low-confidence" => Ok(QualityAction::DeleteLowConfidence {
                threshold: req.threshold.unwrap_or(defaults.low_confidence_threshold),
            }),
            "decay-outdated" => Ok(QualityAction::DecayOutdated {
                days: req.days_threshold.unwrap_or(defaults.stale_days),
                rate: req.decay_rate.unwrap_or(defaults.decay_rate),
            }),
            other => Err(QualityError::InvalidRequest(format!(
                "Unknown quality action: {}",
                other
            ))),
        }
    }
}

/// Outcome of a maintenance action
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ActionResult {
    Merged(MergeOutcome),
    Deleted { count: usize },
    Decayed { count: usize },
}

impl ActionResult {
    pub fn message(&self) -> String {
        match self {
            ActionResult::Merged(outcome) => format!(
                "Merged {} duplicate(s) into triple {}",
                outcome.removed.len(),
                outcome.survivor.id
            ),
            ActionResult::Deleted { count } => {
                format!("Deleted {} low-confidence triple(s)", count)
            }
            ActionResult::Decayed { count } => {
                format!("Decayed confidence of {} outdated triple(s)", count)
            }
        }
    }
}

/// The confidence lifecycle engine
pub struct QualityEngine {
    store: Arc<dyn TripleStore>,
    cache: Arc<Cache>,
    config: QualityConfig,
}

impl QualityEngine {
    pub fn new(store: Arc<dyn TripleStore>, cache: Arc<Cache>, config: QualityConfig) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TripleStore> {
        &self.store
    }

    async fn invalidate_views(&self) {
        let purged = self.cache.invalidate_triple_views().await;
        debug!("Purged {} derived cache entries", purged);
    }

    /// Ingest a triple from an external extractor
    pub async fn insert(&self, triple: &NewTriple) -> Result<Triple> {
        triple.validate()?;
        let created = self.store.insert(triple).await?;
        self.invalidate_views().await;
        Ok(created)
    }

    /// Apply a user feedback transition
    pub async fn apply_feedback(
        &self,
        id: TripleId,
        action: FeedbackAction,
        notes: Option<&str>,
    ) -> Result<FeedbackOutcome> {
        if let FeedbackAction::Adjust(value) = action {
            validate_confidence(value)?;
        }

        let triple = self
            .store
            .apply_feedback(id, action, self.config.approve_boost, notes)
            .await?;
        self.invalidate_views().await;

        let message = match (&action, &triple) {
            (FeedbackAction::Reject, _) => {
                info!(triple_id = %id, "Triple rejected and deleted");
                format!("Triple {} rejected and deleted", id)
            }
            (FeedbackAction::Approve, Some(t)) => {
                info!(triple_id = %id, confidence = t.confidence, "Triple approved");
                format!("Triple {} approved (confidence {:.2})", id, t.confidence)
            }
            (_, Some(t)) => {
                info!(triple_id = %id, confidence = t.confidence, "Triple confidence adjusted");
                format!("Triple {} adjusted (confidence {:.2})", id, t.confidence)
            }
            (_, None) => format!("Triple {} updated", id),
        };

        Ok(FeedbackOutcome { message, triple })
    }

    pub async fn approve(&self, id: TripleId, notes: Option<&str>) -> Result<FeedbackOutcome> {
        self.apply_feedback(id, FeedbackAction::Approve, notes).await
    }

    pub async fn reject(&self, id: TripleId) -> Result<FeedbackOutcome> {
        self.apply_feedback(id, FeedbackAction::Reject, None).await
    }

    pub async fn adjust(
        &self,
        id: TripleId,
        confidence: f64,
        notes: Option<&str>,
    ) -> Result<FeedbackOutcome> {
        self.apply_feedback(id, FeedbackAction::Adjust(confidence), notes)
            .await
    }

    pub async fn feedback_history(&self, id: TripleId) -> Result<Vec<FeedbackRecord>> {
        self.store.list_feedback(id).await
    }

    /// Lower the confidence of every triple not updated for `days` days
    pub async fn decay_outdated(&self, days: i64, rate: f64) -> Result<usize> {
        if days < 0 {
            return Err(QualityError::InvalidRequest(
                "daysThreshold must not be negative".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&rate) {
            return Err(QualityError::InvalidRequest(
                "decayRate must be between 0 and 1".to_string(),
            ));
        }

        let cutoff = days_ago(days)?;
        let count = self.store.decay_outdated(cutoff, rate).await?;
        info!("Decayed {} triple(s) older than {} days by {}", count, days, rate);
        if count > 0 {
            self.invalidate_views().await;
        }
        Ok(count)
    }

    /// Delete every triple with confidence strictly below `threshold`
    pub async fn delete_low_confidence(&self, threshold: f64) -> Result<usize> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(QualityError::InvalidRequest(
                "threshold must be between 0 and 1".to_string(),
            ));
        }

        let count = self.store.delete_low_confidence(threshold).await?;
        info!("Deleted {} triple(s) below confidence {}", count, threshold);
        if count > 0 {
            self.invalidate_views().await;
        }
        Ok(count)
    }

    /// Merge a duplicate group into one survivor
    pub async fn merge_duplicates(&self, ids: &[TripleId]) -> Result<MergeOutcome> {
        let mut distinct = ids.to_vec();
        distinct.sort();
        distinct.dedup();
        if distinct.len() < 2 {
            return Err(QualityError::InvalidRequest(
                "merge-duplicates requires at least two triple ids".to_string(),
            ));
        }

        let outcome = self.store.merge_duplicates(&distinct).await?;
        info!(
            survivor = %outcome.survivor.id,
            removed = outcome.removed.len(),
            "Merged duplicate triples"
        );
        self.invalidate_views().await;
        Ok(outcome)
    }

    /// Merge every duplicate group currently in the store
    ///
    /// Groups are merged one transaction at a time; a failing group is
    /// logged and skipped. Returns (groups merged, rows removed, failures).
    pub async fn merge_all_duplicates(&self) -> Result<(usize, usize, usize)> {
        let groups = self
            .store
            .find_duplicate_groups(self.config.duplicate_report_limit)
            .await?;

        let mut merged = 0;
        let mut removed = 0;
        let mut failures = 0;
        for group in groups {
            let ids: Vec<TripleId> = group.iter().map(|t| t.id).collect();
            match self.merge_duplicates(&ids).await {
                Ok(outcome) => {
                    merged += 1;
                    removed += outcome.removed.len();
                }
                Err(e) => {
                    tracing::warn!("Failed to merge group {:?}: {}", ids, e);
                    failures += 1;
                }
            }
        }
        Ok((merged, removed, failures))
    }

    /// Archive low-confidence triples untouched for twice the staleness window
    pub async fn archive_stale(&self) -> Result<usize> {
        let window = self.config.stale_days.checked_mul(2).ok_or_else(|| {
            QualityError::InvalidRequest(format!(
                "stale_days out of range: {}",
                self.config.stale_days
            ))
        })?;
        let cutoff = days_ago(window)?;
        let count = self
            .store
            .archive(self.config.low_confidence_threshold, cutoff)
            .await?;
        info!("Archived {} stale low-confidence triple(s)", count);
        if count > 0 {
            self.invalidate_views().await;
        }
        Ok(count)
    }

    /// Dispatch an API maintenance action
    pub async fn run_action(&self, action: QualityAction) -> Result<ActionResult> {
        match action {
            QualityAction::MergeDuplicates { ids } => {
                self.merge_duplicates(&ids).await.map(ActionResult::Merged)
            }
            QualityAction::DeleteLowConfidence { threshold } => self
                .delete_low_confidence(threshold)
                .await
                .map(|count| ActionResult::Deleted { count }),
            QualityAction::DecayOutdated { days, rate } => self
                .decay_outdated(days, rate)
                .await
                .map(|count| ActionResult::Decayed { count }),
        }
    }

    /// Read-only scan of duplicate, low-confidence and stale triples
    pub async fn report(&self) -> Result<QualityReport> {
        let groups = self
            .store
            .find_duplicate_groups(self.config.duplicate_report_limit)
            .await?;
        let low = self
            .store
            .count_below(self.config.low_confidence_threshold)
            .await?;
        let stale_cutoff = days_ago(self.config.stale_days)?;
        let stale = self.store.count_stale(stale_cutoff).await?;

        Ok(QualityReport::build(&groups, low, stale, &self.config))
    }
}
