//! Core data types for the knowledge-triple store
//!
//! Triples are subject-predicate-object assertions about inter-company
//! relationships, each carrying a confidence score in [0, 1] and a provenance
//! tag. Feedback records form an append-only audit trail next to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{QualityError, Result};

/// Unique, stable identifier for triples
///
/// Wraps the integer row id so triple ids cannot be confused with
/// feedback ids or counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TripleId(pub i64);

impl std::fmt::Display for TripleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TripleId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Provenance of a triple's current confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidatedBy {
    /// Rule-based baseline extraction
    Baseline,
    /// AI-assisted extraction
    Gpt,
    /// Confirmed or adjusted by a human
    User,
}

impl ValidatedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidatedBy::Baseline => "baseline",
            ValidatedBy::Gpt => "gpt",
            ValidatedBy::User => "user",
        }
    }
}

impl std::str::FromStr for ValidatedBy {
    type Err = QualityError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "baseline" => Ok(ValidatedBy::Baseline),
            "gpt" => Ok(ValidatedBy::Gpt),
            "user" => Ok(ValidatedBy::User),
            other => Err(QualityError::InvalidRequest(format!(
                "Unknown validatedBy value: {}",
                other
            ))),
        }
    }
}

/// A subject-predicate-object assertion with a confidence score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Triple {
    pub id: TripleId,
    /// Namespace-prefixed identifier, e.g. `company:acme`
    pub subject: String,
    pub predicate: String,
    pub object: String,
    /// Always within [0.0, 1.0]
    pub confidence: f64,
    pub validated_by: ValidatedBy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Triple {
    /// Namespace prefix of an identifier (`company:acme` -> `company`)
    pub fn namespace_of(identifier: &str) -> &str {
        identifier
            .split_once(':')
            .map(|(ns, _)| ns)
            .unwrap_or("entity")
    }

    /// Key used to detect near-duplicates: trimmed, ASCII-lower-cased s/p/o
    pub fn duplicate_key(&self) -> (String, String, String) {
        (
            normalize(&self.subject),
            normalize(&self.predicate),
            normalize(&self.object),
        )
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_ascii_lowercase()
}

/// Input for creating a triple
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTriple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f64,
    #[serde(default = "default_validated_by")]
    pub validated_by: ValidatedBy,
}

fn default_validated_by() -> ValidatedBy {
    ValidatedBy::Baseline
}

impl NewTriple {
    pub fn new(subject: &str, predicate: &str, object: &str, confidence: f64) -> Self {
        Self {
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object: object.to_string(),
            confidence,
            validated_by: ValidatedBy::Baseline,
        }
    }

    pub fn validated_by(mut self, validated_by: ValidatedBy) -> Self {
        self.validated_by = validated_by;
        self
    }

    /// Reject empty identifiers and confidences outside [0, 1]
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("subject", &self.subject),
            ("predicate", &self.predicate),
            ("object", &self.object),
        ] {
            if value.trim().is_empty() {
                return Err(QualityError::InvalidRequest(format!(
                    "{} must not be empty",
                    field
                )));
            }
        }
        validate_confidence(self.confidence)
    }
}

/// Reject confidences outside [0, 1] (NaN included)
pub fn validate_confidence(value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(QualityError::InvalidRequest(format!(
            "confidence must be between 0 and 1, got {}",
            value
        )))
    }
}

/// Feedback action names accepted by the feedback API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Approve,
    Reject,
    Adjust,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackKind::Approve => "approve",
            FeedbackKind::Reject => "reject",
            FeedbackKind::Adjust => "adjust",
        }
    }
}

impl std::str::FromStr for FeedbackKind {
    type Err = QualityError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "approve" => Ok(FeedbackKind::Approve),
            "reject" => Ok(FeedbackKind::Reject),
            "adjust" => Ok(FeedbackKind::Adjust),
            other => Err(QualityError::InvalidRequest(format!(
                "Invalid feedback action: {}",
                other
            ))),
        }
    }
}

/// A validated feedback transition
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeedbackAction {
    /// Boost confidence by the configured step, capped at 1.0
    Approve,
    /// Delete the triple
    Reject,
    /// Set confidence to an explicit value in [0, 1]
    Adjust(f64),
}

impl FeedbackAction {
    /// Build an action from the wire form, validating the adjust value
    pub fn parse(kind: &str, confidence: Option<f64>) -> Result<Self> {
        match kind.parse::<FeedbackKind>()? {
            FeedbackKind::Approve => Ok(FeedbackAction::Approve),
            FeedbackKind::Reject => Ok(FeedbackAction::Reject),
            FeedbackKind::Adjust => {
                let value = confidence.ok_or_else(|| {
                    QualityError::InvalidRequest("adjust requires a confidence value".to_string())
                })?;
                validate_confidence(value)?;
                Ok(FeedbackAction::Adjust(value))
            }
        }
    }

    pub fn kind(&self) -> FeedbackKind {
        match self {
            FeedbackAction::Approve => FeedbackKind::Approve,
            FeedbackAction::Reject => FeedbackKind::Reject,
            FeedbackAction::Adjust(_) => FeedbackKind::Adjust,
        }
    }
}

/// Append-only audit entry for a feedback call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    pub id: i64,
    /// May reference a triple that has since been deleted
    pub triple_id: TripleId,
    pub action: FeedbackKind,
    /// Confidence value applied by this feedback
    pub confidence: f64,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

/// Exact-match filter over the triple relation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripleFilter {
    pub subject: Option<String>,
    pub predicate: Option<String>,
    pub object: Option<String>,
    pub min_confidence: Option<f64>,
    pub limit: Option<usize>,
}

impl TripleFilter {
    pub fn subject(mut self, subject: &str) -> Self {
        self.subject = Some(subject.to_string());
        self
    }

    pub fn predicate(mut self, predicate: &str) -> Self {
        self.predicate = Some(predicate.to_string());
        self
    }

    pub fn object(mut self, object: &str) -> Self {
        self.object = Some(object.to_string());
        self
    }

    pub fn min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = Some(min);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validated_by_roundtrip() {
        for v in [ValidatedBy::Baseline, ValidatedBy::Gpt, ValidatedBy::User] {
            assert_eq!(v.as_str().parse::<ValidatedBy>().unwrap(), v);
        }
        assert!("robot".parse::<ValidatedBy>().is_err());
    }

    #[test]
    fn test_feedback_action_parse() {
        assert_eq!(
            FeedbackAction::parse("approve", None).unwrap(),
            FeedbackAction::Approve
        );
        assert_eq!(
            FeedbackAction::parse("adjust", Some(0.95)).unwrap(),
            FeedbackAction::Adjust(0.95)
        );
        assert!(matches!(
            FeedbackAction::parse("adjust", Some(1.5)),
            Err(QualityError::InvalidRequest(_))
        ));
        assert!(matches!(
            FeedbackAction::parse("adjust", None),
            Err(QualityError::InvalidRequest(_))
        ));
        assert!(matches!(
            FeedbackAction::parse("promote", None),
            Err(QualityError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_validate_confidence_rejects_nan() {
        assert!(validate_confidence(f64::NAN).is_err());
        assert!(validate_confidence(0.0).is_ok());
        assert!(validate_confidence(1.0).is_ok());
        assert!(validate_confidence(-0.01).is_err());
    }

    #[test]
    fn test_new_triple_validation() {
        assert!(NewTriple::new("company:a", "partners_with", "company:b", 0.5)
            .validate()
            .is_ok());
        assert!(NewTriple::new(" ", "partners_with", "company:b", 0.5)
            .validate()
            .is_err());
    }

    #[test]
    fn test_namespace_and_duplicate_key() {
        assert_eq!(Triple::namespace_of("company:acme"), "company");
        assert_eq!(Triple::namespace_of("acme"), "entity");

        let now = Utc::now();
        let triple = Triple {
            id: TripleId(1),
            subject: " Company:Acme ".to_string(),
            predicate: "ACQUIRED".to_string(),
            object: "company:widgets".to_string(),
            confidence: 0.5,
            validated_by: ValidatedBy::Gpt,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(
            triple.duplicate_key(),
            (
                "company:acme".to_string(),
                "acquired".to_string(),
                "company:widgets".to_string()
            )
        );
    }

    #[test]
    fn test_triple_serializes_camel_case() {
        let now = Utc::now();
        let triple = Triple {
            id: TripleId(7),
            subject: "company:a".to_string(),
            predicate: "supplies".to_string(),
            object: "company:b".to_string(),
            confidence: 0.8,
            validated_by: ValidatedBy::User,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(&triple).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["validatedBy"], "user");
        assert!(json.get("createdAt").is_some());
    }
}
