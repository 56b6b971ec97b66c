//! Common test utilities and helpers

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use kg_quality::{
    AppConfig, AppState, FeedbackAction, FeedbackRecord, LibsqlStore, MergeOutcome, NewTriple,
    QualityError, Result, Triple, TripleFilter, TripleId, TripleStore,
};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// Test application backed by a fresh database file
pub struct TestApp {
    // Keeps the database file alive for the test
    pub _dir: TempDir,
    pub store: Arc<LibsqlStore>,
    pub state: AppState,
}

impl TestApp {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("kg.db");
        let store = Arc::new(
            LibsqlStore::connect(&path.to_string_lossy())
                .await
                .expect("open test store"),
        );
        let state = AppState::new(store.clone(), &AppConfig::default()).expect("wire state");
        Self {
            _dir: dir,
            store,
            state,
        }
    }

    pub fn router(&self) -> Router {
        kg_quality::router(self.state.clone())
    }

    pub async fn seed(&self, s: &str, p: &str, o: &str, confidence: f64) -> Triple {
        self.store
            .insert(&NewTriple::new(s, p, o, confidence))
            .await
            .expect("seed triple")
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        send(self.router(), Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        send(self.router(), Method::POST, uri, Some(body)).await
    }
}

/// Drive one request through the router and decode the JSON body
pub async fn send(
    router: Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .expect("build request");

    let response = router.oneshot(request).await.expect("router is infallible");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("JSON body")
    };
    (status, json)
}

/// Store whose every call fails as if the database were unreachable
pub struct UnreachableStore;

fn down<T>() -> Result<T> {
    Err(QualityError::StoreUnavailable("connection refused".to_string()))
}

#[async_trait]
impl TripleStore for UnreachableStore {
    async fn ping(&self) -> Result<()> {
        down()
    }
    async fn insert(&self, _triple: &NewTriple) -> Result<Triple> {
        down()
    }
    async fn get(&self, _id: TripleId) -> Result<Triple> {
        down()
    }
    async fn query(&self, _filter: &TripleFilter) -> Result<Vec<Triple>> {
        down()
    }
    async fn since(&self, _cutoff: Option<DateTime<Utc>>) -> Result<Vec<Triple>> {
        down()
    }
    async fn count(&self) -> Result<usize> {
        down()
    }
    async fn count_below(&self, _threshold: f64) -> Result<usize> {
        down()
    }
    async fn count_stale(&self, _cutoff: DateTime<Utc>) -> Result<usize> {
        down()
    }
    async fn find_duplicate_groups(&self, _limit: usize) -> Result<Vec<Vec<Triple>>> {
        down()
    }
    async fn apply_feedback(
        &self,
        _id: TripleId,
        _action: FeedbackAction,
        _approve_boost: f64,
        _notes: Option<&str>,
    ) -> Result<Option<Triple>> {
        down()
    }
    async fn list_feedback(&self, _id: TripleId) -> Result<Vec<FeedbackRecord>> {
        down()
    }
    async fn decay_outdated(&self, _cutoff: DateTime<Utc>, _rate: f64) -> Result<usize> {
        down()
    }
    async fn delete_low_confidence(&self, _threshold: f64) -> Result<usize> {
        down()
    }
    async fn merge_duplicates(&self, _ids: &[TripleId]) -> Result<MergeOutcome> {
        down()
    }
    async fn archive(&self, _threshold: f64, _cutoff: DateTime<Utc>) -> Result<usize> {
        down()
    }
}

/// Router wired to a store that is always down
pub fn unreachable_router() -> Router {
    let state =
        AppState::new(Arc::new(UnreachableStore), &AppConfig::default()).expect("wire state");
    kg_quality::router(state)
}
