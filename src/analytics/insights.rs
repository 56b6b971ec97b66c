//! Insight generation
//!
//! Insights come from an external chat-completion service when one is
//! configured. Its output is untrusted: the payload is shape-checked and any
//! failure (transport, status, timeout, malformed JSON) yields the
//! deterministic basic insights computed locally instead.

use crate::config::InsightsConfig;
use crate::error::{QualityError, Result};
use crate::types::Triple;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightKind {
    Network,
    Health,
}

impl InsightKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightKind::Network => "network",
            InsightKind::Health => "health",
        }
    }
}

impl FromStr for InsightKind {
    type Err = QualityError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "network" => Ok(InsightKind::Network),
            "health" => Ok(InsightKind::Health),
            other => Err(QualityError::InvalidRequest(format!(
                "Unknown insight type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightSource {
    Llm,
    Basic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub title: String,
    pub description: String,
    #[serde(default = "default_severity")]
    pub severity: String,
}

fn default_severity() -> String {
    "info".to_string()
}

impl Insight {
    fn new(title: impl Into<String>, description: impl Into<String>, severity: &str) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            severity: severity.to_string(),
        }
    }
}

/// Response body of the insights endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightsView {
    #[serde(rename = "type")]
    pub kind: InsightKind,
    pub source: InsightSource,
    pub insights: Vec<Insight>,
    pub generated_at: DateTime<Utc>,
    pub is_demo: bool,
}

/// Producer result: provider output, or the local fallback
#[derive(Debug, Clone, PartialEq)]
pub enum InsightOutcome {
    Generated(Vec<Insight>),
    Fallback(Vec<Insight>),
}

impl InsightOutcome {
    pub fn into_view(self, kind: InsightKind) -> InsightsView {
        let (source, insights) = match self {
            InsightOutcome::Generated(insights) => (InsightSource::Llm, insights),
            InsightOutcome::Fallback(insights) => (InsightSource::Basic, insights),
        };
        InsightsView {
            kind,
            source,
            insights,
            generated_at: Utc::now(),
            is_demo: false,
        }
    }
}

/// Compact statistics handed to the provider as prompt context
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightContext {
    pub total_triples: usize,
    pub average_confidence: f64,
    pub low_confidence: usize,
    pub user_validated: usize,
    pub distinct_entities: usize,
    pub top_relations: Vec<(String, usize)>,
    pub top_entities: Vec<(String, usize)>,
}

impl InsightContext {
    pub fn from_triples(triples: &[Triple]) -> Self {
        let mut relations: BTreeMap<&str, usize> = BTreeMap::new();
        let mut entities: BTreeMap<&str, usize> = BTreeMap::new();
        for t in triples {
            *relations.entry(t.predicate.as_str()).or_default() += 1;
            *entities.entry(t.subject.as_str()).or_default() += 1;
            *entities.entry(t.object.as_str()).or_default() += 1;
        }

        let total = triples.len();
        let average = if total == 0 {
            0.0
        } else {
            triples.iter().map(|t| t.confidence).sum::<f64>() / total as f64
        };

        Self {
            total_triples: total,
            average_confidence: average,
            low_confidence: triples.iter().filter(|t| t.confidence < 0.5).count(),
            user_validated: triples
                .iter()
                .filter(|t| t.validated_by == crate::types::ValidatedBy::User)
                .count(),
            distinct_entities: entities.len(),
            top_relations: top_n(relations, 5),
            top_entities: top_n(entities, 5),
        }
    }
}

pub(crate) fn top_n(counts: BTreeMap<&str, usize>, n: usize) -> Vec<(String, usize)> {
    let mut pairs: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(name, count)| (name.to_string(), count))
        .collect();
    // Stable sort keeps names ascending within equal counts
    pairs.sort_by(|a, b| b.1.cmp(&a.1));
    pairs.truncate(n);
    pairs
}

/// Deterministic insights computed without any external call
pub fn basic_insights(kind: InsightKind, triples: &[Triple]) -> Vec<Insight> {
    let ctx = InsightContext::from_triples(triples);
    if ctx.total_triples == 0 {
        return vec![Insight::new(
            "No data",
            "The knowledge graph is empty; ingest triples to generate insights.",
            "info",
        )];
    }

    match kind {
        InsightKind::Network => {
            let mut out = Vec::new();
            if let Some((entity, count)) = ctx.top_entities.first() {
                out.push(Insight::new(
                    "Most connected entity",
                    format!("{} appears in {} relationship(s).", entity, count),
                    "info",
                ));
            }
            if let Some((relation, count)) = ctx.top_relations.first() {
                out.push(Insight::new(
                    "Dominant relation",
                    format!(
                        "'{}' accounts for {} of {} triple(s).",
                        relation, count, ctx.total_triples
                    ),
                    "info",
                ));
            }
            let isolated_pairs = isolated_pair_count(triples);
            if isolated_pairs > 0 {
                out.push(Insight::new(
                    "Isolated relationships",
                    format!(
                        "{} relationship(s) connect entities that appear nowhere else.",
                        isolated_pairs
                    ),
                    "low",
                ));
            }
            out
        }
        InsightKind::Health => {
            let low_share = ctx.low_confidence as f64 / ctx.total_triples as f64;
            let severity = if low_share > 0.3 {
                "high"
            } else if low_share > 0.1 {
                "medium"
            } else {
                "low"
            };
            vec![
                Insight::new(
                    "Average confidence",
                    format!(
                        "Average confidence across {} triple(s) is {:.2}.",
                        ctx.total_triples, ctx.average_confidence
                    ),
                    "info",
                ),
                Insight::new(
                    "Low-confidence share",
                    format!(
                        "{} triple(s) ({:.0}%) are below 0.5 confidence.",
                        ctx.low_confidence,
                        low_share * 100.0
                    ),
                    severity,
                ),
                Insight::new(
                    "User validation",
                    format!(
                        "{} of {} triple(s) have been validated by a user.",
                        ctx.user_validated, ctx.total_triples
                    ),
                    "info",
                ),
            ]
        }
    }
}

fn isolated_pair_count(triples: &[Triple]) -> usize {
    let mut degree: BTreeMap<&str, usize> = BTreeMap::new();
    for t in triples {
        *degree.entry(t.subject.as_str()).or_default() += 1;
        *degree.entry(t.object.as_str()).or_default() += 1;
    }
    let mut seen = HashSet::new();
    triples
        .iter()
        .filter(|t| {
            degree.get(t.subject.as_str()) == Some(&1) && degree.get(t.object.as_str()) == Some(&1)
        })
        .filter(|t| seen.insert((t.subject.as_str(), t.object.as_str())))
        .count()
}

/// External insight generator
#[async_trait]
pub trait InsightProvider: Send + Sync {
    async fn generate(&self, kind: InsightKind, context: &InsightContext) -> Result<Vec<Insight>>;
}

/// OpenAI-compatible chat completion request
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Debug, Deserialize)]
struct ChatContent {
    content: String,
}

/// Provider backed by an OpenAI-compatible chat completion API
pub struct ChatInsightProvider {
    config: InsightsConfig,
    client: reqwest::Client,
}

impl ChatInsightProvider {
    /// `None` when no API key is configured
    pub fn from_config(config: &InsightsConfig) -> Result<Option<Self>> {
        if config.api_key.is_empty() {
            return Ok(None);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| QualityError::ExternalService(format!("HTTP client: {}", e)))?;

        Ok(Some(Self {
            config: config.clone(),
            client,
        }))
    }

    fn prompt(kind: InsightKind, context: &InsightContext) -> Result<String> {
        let focus = match kind {
            InsightKind::Network => {
                "structural observations about the business relationship network: hubs, clusters, unusual relations"
            }
            InsightKind::Health => {
                "data quality observations: confidence levels, validation coverage, likely noise"
            }
        };
        Ok(format!(
            r#"You analyse a knowledge graph of business relationships.

Statistics (JSON):
{}

Give 3-5 {}.

Respond with JSON only, EXACTLY in this shape:
{{"insights": [{{"title": "...", "description": "...", "severity": "info|low|medium|high"}}]}}
"#,
            serde_json::to_string_pretty(context)?,
            focus
        ))
    }

    async fn call_api(&self, prompt: &str) -> Result<String> {
        debug!("Calling insight provider");

        let request = ChatRequest {
            model: self.config.model.clone(),
            temperature: 0.3,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| QualityError::ExternalService(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(QualityError::ExternalService(format!(
                "API request failed with status {}: {}",
                status, error_text
            )));
        }

        let api_response: ChatResponse = response.json().await.map_err(|e| {
            QualityError::ExternalService(format!("Failed to parse response: {}", e))
        })?;

        api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| QualityError::ExternalService("Empty response from API".to_string()))
    }
}

#[async_trait]
impl InsightProvider for ChatInsightProvider {
    async fn generate(&self, kind: InsightKind, context: &InsightContext) -> Result<Vec<Insight>> {
        let prompt = Self::prompt(kind, context)?;
        let content = self.call_api(&prompt).await?;
        parse_insights(&content)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InsightPayload {
    Wrapped { insights: Vec<Insight> },
    Bare(Vec<Insight>),
}

/// Parse and shape-check provider output
pub fn parse_insights(content: &str) -> Result<Vec<Insight>> {
    let body = strip_code_fence(content);
    let payload: InsightPayload = serde_json::from_str(body)
        .map_err(|e| QualityError::ExternalService(format!("Malformed insight payload: {}", e)))?;

    let insights = match payload {
        InsightPayload::Wrapped { insights } | InsightPayload::Bare(insights) => insights,
    };

    if insights.is_empty() {
        return Err(QualityError::ExternalService(
            "Insight payload contained no insights".to_string(),
        ));
    }
    if insights
        .iter()
        .any(|i| i.title.trim().is_empty() || i.description.trim().is_empty())
    {
        return Err(QualityError::ExternalService(
            "Insight payload contained empty entries".to_string(),
        ));
    }

    Ok(insights)
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the optional language tag on the opening fence
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TripleId, ValidatedBy};

    fn triple(id: i64, s: &str, p: &str, o: &str, c: f64) -> Triple {
        Triple {
            id: TripleId(id),
            subject: s.to_string(),
            predicate: p.to_string(),
            object: o.to_string(),
            confidence: c,
            validated_by: ValidatedBy::Baseline,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_parse_wrapped_and_bare() {
        let wrapped = r#"{"insights": [{"title": "Hub", "description": "Acme is central", "severity": "info"}]}"#;
        assert_eq!(parse_insights(wrapped).unwrap().len(), 1);

        let bare = "```json\n[{\"title\": \"Hub\", \"description\": \"Acme is central\"}]\n```";
        let parsed = parse_insights(bare).unwrap();
        assert_eq!(parsed[0].severity, "info");
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        for bad in [
            "not json",
            r#"{"insights": []}"#,
            r#"{"insights": [{"title": "", "description": "x"}]}"#,
            r#"{"result": "ok"}"#,
            r#"[{"title": 3}]"#,
        ] {
            assert!(
                matches!(parse_insights(bad), Err(QualityError::ExternalService(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_basic_insights_are_deterministic() {
        let triples = vec![
            triple(1, "company:acme", "supplies", "company:globex", 0.9),
            triple(2, "company:acme", "owns", "company:initech", 0.4),
            triple(3, "company:x", "competes_with", "company:y", 0.2),
        ];

        let network = basic_insights(InsightKind::Network, &triples);
        assert_eq!(network, basic_insights(InsightKind::Network, &triples));
        assert!(network[0].description.starts_with("company:acme appears in 2"));
        assert_eq!(network.last().unwrap().title, "Isolated relationships");

        let health = basic_insights(InsightKind::Health, &triples);
        assert_eq!(health.len(), 3);
        assert_eq!(health[1].severity, "high");
    }

    #[test]
    fn test_basic_insights_on_empty_graph() {
        let insights = basic_insights(InsightKind::Health, &[]);
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].title, "No data");
    }

    #[test]
    fn test_provider_disabled_without_key() {
        let config = InsightsConfig::default();
        assert!(ChatInsightProvider::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("network".parse::<InsightKind>().unwrap(), InsightKind::Network);
        assert!(matches!(
            "weather".parse::<InsightKind>(),
            Err(QualityError::InvalidRequest(_))
        ));
    }
}
