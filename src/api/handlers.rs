//! Request handlers
//!
//! Mutating endpoints report failures as `{ success: false, error }` with the
//! status mapped from the error class. Read endpoints for derived views fall
//! back to demo data when the store is unreachable.

use super::server::AppState;
use crate::analytics::{
    demo, AnalyticsSummary, GraphView, InsightKind, InsightsView, Period, DEFAULT_GRAPH_LIMIT,
    DEFAULT_GRAPH_MIN_CONFIDENCE,
};
use crate::cache::CacheStats;
use crate::error::QualityError;
use crate::quality::{QualityAction, QualityActionRequest};
use crate::scheduler::JobStatus;
use crate::storage::TripleStore;
use crate::types::{FeedbackAction, NewTriple, TripleId};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, warn};

type ApiResult<T> = std::result::Result<T, QualityError>;

impl IntoResponse for QualityError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            debug!("Request rejected: {}", self);
        }
        (
            status,
            Json(json!({ "success": false, "error": self.to_string() })),
        )
            .into_response()
    }
}

fn bad_json(rejection: JsonRejection) -> QualityError {
    QualityError::InvalidRequest(rejection.body_text())
}

fn bad_query(rejection: QueryRejection) -> QualityError {
    QualityError::InvalidRequest(rejection.body_text())
}

// Quality

pub async fn quality_report_handler(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let report = state.engine.report().await?;
    Ok(Json(json!({ "success": true, "report": report })))
}

pub async fn quality_action_handler(
    State(state): State<AppState>,
    payload: Result<Json<QualityActionRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload.map_err(bad_json)?;
    let action = QualityAction::from_request(&req, state.engine.config())?;
    let result = state.engine.run_action(action).await?;
    Ok(Json(json!({
        "success": true,
        "message": result.message(),
        "result": result,
    })))
}

// Feedback

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRequest {
    pub triple_id: i64,
    pub feedback: FeedbackBody,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackBody {
    pub action: String,
    pub confidence: Option<f64>,
    pub notes: Option<String>,
}

pub async fn submit_feedback_handler(
    State(state): State<AppState>,
    payload: Result<Json<FeedbackRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload.map_err(bad_json)?;
    let action = FeedbackAction::parse(&req.feedback.action, req.feedback.confidence)?;
    let outcome = state
        .engine
        .apply_feedback(TripleId(req.triple_id), action, req.feedback.notes.as_deref())
        .await?;

    let mut body = json!({ "success": true, "message": outcome.message });
    if let Some(triple) = outcome.triple {
        body["triple"] = serde_json::to_value(triple)?;
    }
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackQuery {
    pub triple_id: Option<i64>,
}

pub async fn list_feedback_handler(
    State(state): State<AppState>,
    query: Result<Query<FeedbackQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(q) = query.map_err(bad_query)?;
    let id = q
        .triple_id
        .ok_or_else(|| QualityError::InvalidRequest("tripleId is required".to_string()))?;
    let feedback = state.engine.feedback_history(TripleId(id)).await?;
    Ok(Json(json!({ "success": true, "feedback": feedback })))
}

// Scheduler

#[derive(Debug, Deserialize)]
pub struct JobQuery {
    pub job: Option<String>,
}

pub async fn job_status_handler(
    State(state): State<AppState>,
    query: Result<Query<JobQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(q) = query.map_err(bad_query)?;

    let body = match q.job.as_deref() {
        Some(name) => {
            let job = state.scheduler.get_job_status(Some(name)).await?.pop();
            json!({ "success": true, "job": job })
        }
        None => {
            let jobs = state.scheduler.get_job_status(None).await?;
            json!({
                "success": true,
                "initialized": state.scheduler.is_initialized(),
                "jobs": jobs,
            })
        }
    };
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerRequest {
    pub action: String,
    pub job_name: Option<String>,
    pub enabled: Option<bool>,
}

fn require<T>(value: Option<T>, field: &str, action: &str) -> ApiResult<T> {
    value.ok_or_else(|| {
        QualityError::InvalidRequest(format!("{} is required for action {}", field, action))
    })
}

pub async fn scheduler_action_handler(
    State(state): State<AppState>,
    payload: Result<Json<SchedulerRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload.map_err(bad_json)?;
    let scheduler = &state.scheduler;

    let body = match req.action.as_str() {
        "initialize" => {
            let started = scheduler.initialize().await;
            let message = if started {
                "Scheduler initialized"
            } else {
                "Scheduler already initialized"
            };
            json!({ "success": true, "message": message })
        }
        "run" => {
            let name = require(req.job_name, "jobName", "run")?;
            let run = scheduler.run_job_manually(&name).await?;
            let ok = run.status == JobStatus::Success;
            let message = match &run.report.error_message {
                Some(err) if !ok => format!(
                    "Job {} finished with status {:?}: {}",
                    name, run.status, err
                ),
                _ => format!("Job {} completed", name),
            };
            json!({ "success": ok, "message": message, "run": run })
        }
        "toggle" => {
            let name = require(req.job_name, "jobName", "toggle")?;
            let enabled = require(req.enabled, "enabled", "toggle")?;
            let job = scheduler.toggle_job(&name, enabled).await?;
            json!({
                "success": true,
                "message": format!("Job {} {}", name, if enabled { "enabled" } else { "disabled" }),
                "job": job,
            })
        }
        "stop-all" => {
            scheduler.stop_all().await;
            json!({ "success": true, "message": "All jobs stopped" })
        }
        other => {
            return Err(QualityError::InvalidRequest(format!(
                "Unknown scheduler action: {}",
                other
            )))
        }
    };
    Ok(Json(body))
}

// Analytics

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    pub period: Option<String>,
}

pub async fn analytics_handler(
    State(state): State<AppState>,
    query: Result<Query<AnalyticsQuery>, QueryRejection>,
) -> ApiResult<Json<AnalyticsSummary>> {
    let Query(q) = query.map_err(bad_query)?;
    let period = match q.period.as_deref() {
        Some(p) => p.parse::<Period>()?,
        None => Period::default(),
    };

    match state.analytics.analytics(period).await {
        Ok(summary) => Ok(Json(summary)),
        Err(e) if e.is_unavailable() => {
            warn!("Serving demo analytics: {}", e);
            Ok(Json(demo::analytics(period)))
        }
        Err(e) => Err(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQuery {
    pub limit: Option<usize>,
    pub min_confidence: Option<f64>,
    pub company: Option<String>,
}

pub async fn graph_handler(
    State(state): State<AppState>,
    query: Result<Query<GraphQuery>, QueryRejection>,
) -> ApiResult<Json<GraphView>> {
    let Query(q) = query.map_err(bad_query)?;
    let limit = q.limit.unwrap_or(DEFAULT_GRAPH_LIMIT);
    let min_confidence = q.min_confidence.unwrap_or(DEFAULT_GRAPH_MIN_CONFIDENCE);
    let company = q.company.as_deref().filter(|c| !c.is_empty());

    match state.analytics.graph(limit, min_confidence, company).await {
        Ok(graph) => Ok(Json(graph)),
        Err(e) if e.is_unavailable() => {
            warn!("Serving demo graph: {}", e);
            Ok(Json(demo::graph(limit, min_confidence)))
        }
        Err(e) => Err(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct InsightsQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

pub async fn insights_handler(
    State(state): State<AppState>,
    query: Result<Query<InsightsQuery>, QueryRejection>,
) -> ApiResult<Json<InsightsView>> {
    let Query(q) = query.map_err(bad_query)?;
    let kind = match q.kind.as_deref() {
        Some(k) => k.parse::<InsightKind>()?,
        None => InsightKind::Network,
    };

    match state.analytics.insights(kind).await {
        Ok(view) => Ok(Json(view)),
        Err(e) if e.is_unavailable() => {
            warn!("Serving demo insights: {}", e);
            Ok(Json(demo::insights(kind)))
        }
        Err(e) => Err(e),
    }
}

// Ingestion

pub async fn create_triple_handler(
    State(state): State<AppState>,
    payload: Result<Json<NewTriple>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(triple) = payload.map_err(bad_json)?;
    let created = state.engine.insert(&triple).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "triple": created })),
    ))
}

// Health

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub store: String,
    pub cache: CacheStats,
    pub scheduler_initialized: bool,
}

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = match state.engine.store().ping().await {
        Ok(()) => "ok".to_string(),
        Err(e) => {
            warn!("Health check: store unreachable: {}", e);
            "unavailable".to_string()
        }
    };

    Json(HealthResponse {
        status: if store == "ok" { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store,
        cache: state.cache.stats().await,
        scheduler_initialized: state.scheduler.is_initialized(),
    })
}
