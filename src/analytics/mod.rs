//! Read-only analytics over the triple store
//!
//! Aggregates, graph projections and insights are computed from a window of
//! triples and always read through the cache. Errors from the store
//! propagate unchanged; substituting demo data on `StoreUnavailable` is the
//! endpoint's decision (see [`demo`]).

pub mod demo;
pub mod insights;

pub use insights::{
    basic_insights, ChatInsightProvider, Insight, InsightContext, InsightKind, InsightOutcome,
    InsightProvider, InsightSource, InsightsView,
};

use crate::cache::{keys, Cache, CacheTtl};
use crate::error::{QualityError, Result};
use crate::storage::TripleStore;
use crate::types::{Triple, TripleFilter, ValidatedBy};
use chrono::{Duration as ChronoDuration, Utc};
use insights::top_n;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

pub const DEFAULT_GRAPH_LIMIT: usize = 100;
pub const MAX_GRAPH_LIMIT: usize = 1000;
pub const DEFAULT_GRAPH_MIN_CONFIDENCE: f64 = 0.7;
pub const DEFAULT_INSIGHT_LOOKBACK_DAYS: i64 = 90;
const TOP_N: usize = 10;

/// Analytics lookback window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "90d")]
    Quarter,
    #[serde(rename = "all")]
    All,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Week => "7d",
            Period::Month => "30d",
            Period::Quarter => "90d",
            Period::All => "all",
        }
    }

    pub fn days(&self) -> Option<i64> {
        match self {
            Period::Week => Some(7),
            Period::Month => Some(30),
            Period::Quarter => Some(90),
            Period::All => None,
        }
    }
}

impl Default for Period {
    fn default() -> Self {
        Period::Month
    }
}

impl FromStr for Period {
    type Err = QualityError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "7d" => Ok(Period::Week),
            "30d" => Ok(Period::Month),
            "90d" => Ok(Period::Quarter),
            "all" => Ok(Period::All),
            other => Err(QualityError::InvalidRequest(format!(
                "Unknown period: {} (expected 7d, 30d, 90d or all)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedCount {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBucket {
    pub range: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationCounts {
    pub baseline: usize,
    pub gpt: usize,
    pub user: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    /// Calendar day, `YYYY-MM-DD`
    pub date: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    pub period: Period,
    pub total_triples: usize,
    pub average_confidence: f64,
    pub confidence_distribution: Vec<ConfidenceBucket>,
    pub relation_types: Vec<NamedCount>,
    pub top_entities: Vec<NamedCount>,
    pub validation: ValidationCounts,
    pub trend: Vec<TrendPoint>,
    pub is_demo: bool,
}

const BUCKET_LABELS: [&str; 5] = ["0.0-0.2", "0.2-0.4", "0.4-0.6", "0.6-0.8", "0.8-1.0"];

impl AnalyticsSummary {
    pub fn from_triples(period: Period, triples: &[Triple]) -> Self {
        let mut buckets = [0usize; 5];
        let mut relations: BTreeMap<&str, usize> = BTreeMap::new();
        let mut entities: BTreeMap<&str, usize> = BTreeMap::new();
        let mut trend: BTreeMap<String, usize> = BTreeMap::new();
        let mut validation = ValidationCounts::default();

        for t in triples {
            let idx = ((t.confidence * 5.0).floor() as usize).min(4);
            buckets[idx] += 1;
            *relations.entry(t.predicate.as_str()).or_default() += 1;
            *entities.entry(t.subject.as_str()).or_default() += 1;
            *entities.entry(t.object.as_str()).or_default() += 1;
            *trend
                .entry(t.created_at.format("%Y-%m-%d").to_string())
                .or_default() += 1;
            match t.validated_by {
                ValidatedBy::Baseline => validation.baseline += 1,
                ValidatedBy::Gpt => validation.gpt += 1,
                ValidatedBy::User => validation.user += 1,
            }
        }

        let total = triples.len();
        let average_confidence = if total == 0 {
            0.0
        } else {
            triples.iter().map(|t| t.confidence).sum::<f64>() / total as f64
        };

        let named = |pairs: Vec<(String, usize)>| -> Vec<NamedCount> {
            pairs
                .into_iter()
                .map(|(name, count)| NamedCount { name, count })
                .collect()
        };

        Self {
            period,
            total_triples: total,
            average_confidence,
            confidence_distribution: BUCKET_LABELS
                .iter()
                .zip(buckets)
                .map(|(range, count)| ConfidenceBucket {
                    range: range.to_string(),
                    count,
                })
                .collect(),
            relation_types: named(top_n(relations, TOP_N)),
            top_entities: named(top_n(entities, TOP_N)),
            validation,
            trend: trend
                .into_iter()
                .map(|(date, count)| TrendPoint { date, count })
                .collect(),
            is_demo: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub degree: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub predicate: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphView {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub is_demo: bool,
}

impl GraphView {
    pub fn from_triples(triples: &[Triple]) -> Self {
        let mut degree: BTreeMap<&str, usize> = BTreeMap::new();
        let edges: Vec<GraphEdge> = triples
            .iter()
            .map(|t| {
                *degree.entry(t.subject.as_str()).or_default() += 1;
                *degree.entry(t.object.as_str()).or_default() += 1;
                GraphEdge {
                    source: t.subject.clone(),
                    target: t.object.clone(),
                    predicate: t.predicate.clone(),
                    confidence: t.confidence,
                }
            })
            .collect();

        let nodes = degree
            .into_iter()
            .map(|(id, degree)| GraphNode {
                id: id.to_string(),
                label: id.split_once(':').map(|(_, name)| name).unwrap_or(id).to_string(),
                node_type: Triple::namespace_of(id).to_string(),
                degree,
            })
            .collect();

        Self {
            nodes,
            edges,
            is_demo: false,
        }
    }
}

/// Cached analytics, graph and insight views
pub struct AnalyticsService {
    store: Arc<dyn TripleStore>,
    cache: Arc<Cache>,
    provider: Option<Arc<dyn InsightProvider>>,
    insight_timeout: Duration,
    insight_lookback_days: i64,
}

impl AnalyticsService {
    pub fn new(
        store: Arc<dyn TripleStore>,
        cache: Arc<Cache>,
        provider: Option<Arc<dyn InsightProvider>>,
        insight_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            provider,
            insight_timeout,
            insight_lookback_days: DEFAULT_INSIGHT_LOOKBACK_DAYS,
        }
    }

    /// Limit insight generation to triples created within the last `days` days
    pub fn with_insight_lookback(mut self, days: i64) -> Self {
        self.insight_lookback_days = days;
        self
    }

    pub async fn analytics(&self, period: Period) -> Result<AnalyticsSummary> {
        let key = keys::analytics(period.as_str());
        self.cache
            .with_cache(&key, CacheTtl::Long, move || async move {
                let cutoff = period.days().map(|d| Utc::now() - ChronoDuration::days(d));
                let triples = self.store.since(cutoff).await?;
                debug!("Computing analytics over {} triple(s)", triples.len());
                Ok(AnalyticsSummary::from_triples(period, &triples))
            })
            .await
    }

    pub async fn graph(
        &self,
        limit: usize,
        min_confidence: f64,
        company: Option<&str>,
    ) -> Result<GraphView> {
        if limit == 0 || limit > MAX_GRAPH_LIMIT {
            return Err(QualityError::InvalidRequest(format!(
                "limit must be between 1 and {}",
                MAX_GRAPH_LIMIT
            )));
        }
        crate::types::validate_confidence(min_confidence)?;

        let key = keys::graph(limit, min_confidence, company);
        self.cache
            .with_cache(&key, CacheTtl::Medium, move || async move {
                let base = TripleFilter::default().min_confidence(min_confidence);
                let mut triples = match company {
                    Some(company) => {
                        let mut rows = self
                            .store
                            .query(&base.clone().subject(company).limit(limit))
                            .await?;
                        rows.extend(self.store.query(&base.object(company).limit(limit)).await?);
                        rows.sort_by(|a, b| {
                            b.confidence
                                .total_cmp(&a.confidence)
                                .then_with(|| a.id.cmp(&b.id))
                        });
                        rows.dedup_by_key(|t| t.id);
                        rows
                    }
                    None => self.store.query(&base.limit(limit)).await?,
                };
                triples.truncate(limit);
                Ok(GraphView::from_triples(&triples))
            })
            .await
    }

    pub async fn insights(&self, kind: InsightKind) -> Result<InsightsView> {
        let key = keys::insights(kind.as_str());
        self.cache
            .with_cache(&key, CacheTtl::Day, move || async move {
                let window = ChronoDuration::try_days(self.insight_lookback_days)
                    .and_then(|days| Utc::now().checked_sub_signed(days))
                    .ok_or_else(|| {
                        QualityError::Config(format!(
                            "insight lookback out of range: {} days",
                            self.insight_lookback_days
                        ))
                    })?;
                let triples = self.store.since(Some(window)).await?;
                debug!(
                    "Generating {} insights over {} triple(s)",
                    kind.as_str(),
                    triples.len()
                );
                Ok(self.generate_insights(kind, &triples).await.into_view(kind))
            })
            .await
    }

    /// Provider output when available and well-formed, basic insights otherwise
    pub async fn generate_insights(&self, kind: InsightKind, triples: &[Triple]) -> InsightOutcome {
        let Some(provider) = &self.provider else {
            return InsightOutcome::Fallback(basic_insights(kind, triples));
        };

        let context = InsightContext::from_triples(triples);
        match timeout(self.insight_timeout, provider.generate(kind, &context)).await {
            Ok(Ok(insights)) => InsightOutcome::Generated(insights),
            Ok(Err(e)) => {
                warn!("Insight provider failed, using basic insights: {}", e);
                InsightOutcome::Fallback(basic_insights(kind, triples))
            }
            Err(_) => {
                warn!(
                    "Insight provider timed out after {:?}, using basic insights",
                    self.insight_timeout
                );
                InsightOutcome::Fallback(basic_insights(kind, triples))
            }
        }
    }
}
