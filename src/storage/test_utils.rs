//! Test utilities for storage initialization
//!
//! Each test gets its own database file inside a temporary directory; the
//! directory guard must be kept alive for the duration of the test.

use crate::error::{QualityError, Result};
use crate::storage::{LibsqlStore, MergeOutcome, TripleStore};
use crate::types::{FeedbackAction, FeedbackRecord, NewTriple, Triple, TripleFilter, TripleId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;

/// Create a migrated store backed by a fresh temporary file
pub async fn create_test_store() -> (TempDir, LibsqlStore) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("triples.db");
    let store = LibsqlStore::connect(&path.to_string_lossy())
        .await
        .expect("open test store");
    (dir, store)
}

/// Insert a baseline triple stamped with the current time
pub async fn seed(
    store: &LibsqlStore,
    subject: &str,
    predicate: &str,
    object: &str,
    confidence: f64,
) -> Triple {
    store
        .insert(&NewTriple::new(subject, predicate, object, confidence))
        .await
        .expect("seed triple")
}

/// Store whose every call fails as if the database were unreachable
pub struct UnreachableStore;

fn unreachable<T>() -> Result<T> {
    Err(QualityError::StoreUnavailable("connection refused".to_string()))
}

#[async_trait]
impl TripleStore for UnreachableStore {
    async fn ping(&self) -> Result<()> {
        unreachable()
    }

    async fn insert(&self, _triple: &NewTriple) -> Result<Triple> {
        unreachable()
    }

    async fn get(&self, _id: TripleId) -> Result<Triple> {
        unreachable()
    }

    async fn query(&self, _filter: &TripleFilter) -> Result<Vec<Triple>> {
        unreachable()
    }

    async fn since(&self, _cutoff: Option<DateTime<Utc>>) -> Result<Vec<Triple>> {
        unreachable()
    }

    async fn count(&self) -> Result<usize> {
        unreachable()
    }

    async fn count_below(&self, _threshold: f64) -> Result<usize> {
        unreachable()
    }

    async fn count_stale(&self, _cutoff: DateTime<Utc>) -> Result<usize> {
        unreachable()
    }

    async fn find_duplicate_groups(&self, _limit: usize) -> Result<Vec<Vec<Triple>>> {
        unreachable()
    }

    async fn apply_feedback(
        &self,
        _id: TripleId,
        _action: FeedbackAction,
        _approve_boost: f64,
        _notes: Option<&str>,
    ) -> Result<Option<Triple>> {
        unreachable()
    }

    async fn list_feedback(&self, _id: TripleId) -> Result<Vec<FeedbackRecord>> {
        unreachable()
    }

    async fn decay_outdated(&self, _cutoff: DateTime<Utc>, _rate: f64) -> Result<usize> {
        unreachable()
    }

    async fn delete_low_confidence(&self, _threshold: f64) -> Result<usize> {
        unreachable()
    }

    async fn merge_duplicates(&self, _ids: &[TripleId]) -> Result<MergeOutcome> {
        unreachable()
    }

    async fn archive(&self, _threshold: f64, _cutoff: DateTime<Utc>) -> Result<usize> {
        unreachable()
    }
}
