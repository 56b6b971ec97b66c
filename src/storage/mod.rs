//! Storage layer for the knowledge-triple store
//!
//! `TripleStore` is the typed accessor every other component goes through.
//! Every mutation that touches more than one row runs inside a single
//! transaction in the backend, so readers never observe partial state.

pub mod libsql;
#[cfg(test)]
pub mod test_utils;

use crate::error::Result;
use crate::types::{FeedbackAction, FeedbackRecord, NewTriple, Triple, TripleFilter, TripleId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub use self::libsql::LibsqlStore;

/// Outcome of merging a duplicate group
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    /// Surviving row after the merge
    pub survivor: Triple,
    /// Ids deleted by the merge
    pub removed: Vec<TripleId>,
    /// Feedback records re-pointed at the survivor
    pub feedback_moved: usize,
}

/// Storage backend trait defining all required operations
#[async_trait]
pub trait TripleStore: Send + Sync {
    /// Cheap reachability probe
    async fn ping(&self) -> Result<()>;

    /// Insert a new triple stamped with the current time
    async fn insert(&self, triple: &NewTriple) -> Result<Triple>;

    /// Fetch one triple, `NotFound` if absent
    async fn get(&self, id: TripleId) -> Result<Triple>;

    /// Exact-match filter, ordered by descending confidence then ascending id
    async fn query(&self, filter: &TripleFilter) -> Result<Vec<Triple>>;

    /// Triples created at or after `cutoff` (all triples when `None`)
    async fn since(&self, cutoff: Option<DateTime<Utc>>) -> Result<Vec<Triple>>;

    /// Total number of triples
    async fn count(&self) -> Result<usize>;

    /// Number of triples with confidence strictly below `threshold`
    async fn count_below(&self, threshold: f64) -> Result<usize>;

    /// Number of triples whose `updated_at` is older than `cutoff`
    async fn count_stale(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Groups of two or more triples sharing a normalized subject/predicate/object
    async fn find_duplicate_groups(&self, limit: usize) -> Result<Vec<Vec<Triple>>>;

    /// Apply a feedback transition, appending an audit record when notes are given.
    ///
    /// Returns the updated triple, or `None` after a reject.
    async fn apply_feedback(
        &self,
        id: TripleId,
        action: FeedbackAction,
        approve_boost: f64,
        notes: Option<&str>,
    ) -> Result<Option<Triple>>;

    /// Feedback history for a triple, oldest first
    async fn list_feedback(&self, id: TripleId) -> Result<Vec<FeedbackRecord>>;

    /// Subtract `rate` (floored at 0) from every triple not updated since `cutoff`
    async fn decay_outdated(&self, cutoff: DateTime<Utc>, rate: f64) -> Result<usize>;

    /// Delete every triple with confidence strictly below `threshold`
    async fn delete_low_confidence(&self, threshold: f64) -> Result<usize>;

    /// Collapse a duplicate group into its highest-confidence member
    async fn merge_duplicates(&self, ids: &[TripleId]) -> Result<MergeOutcome>;

    /// Move low-confidence triples not updated since `cutoff` into the archive
    async fn archive(&self, threshold: f64, cutoff: DateTime<Utc>) -> Result<usize>;
}
