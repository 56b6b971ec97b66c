//! Quality report assembly

use crate::config::QualityConfig;
use crate::types::{Triple, TripleId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IssueType {
    Duplicate,
    LowConfidence,
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityIssue {
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub severity: Severity,
    pub description: String,
    /// Affected rows; empty for aggregate issues
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triple_ids: Vec<TripleId>,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuesByType {
    pub duplicate: usize,
    pub low_confidence: usize,
    pub stale: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    pub timestamp: DateTime<Utc>,
    pub total_issues: usize,
    pub issues_by_type: IssuesByType,
    pub issues: Vec<QualityIssue>,
    pub recommendations: Vec<String>,
}

impl QualityReport {
    pub(crate) fn build(
        duplicate_groups: &[Vec<Triple>],
        low_confidence: usize,
        stale: usize,
        config: &QualityConfig,
    ) -> Self {
        let mut issues = Vec::new();

        for group in duplicate_groups {
            let Some(first) = group.first() else { continue };
            let severity = if group.len() > 3 {
                Severity::High
            } else {
                Severity::Medium
            };
            issues.push(QualityIssue {
                issue_type: IssueType::Duplicate,
                severity,
                description: format!(
                    "{} copies of ({}, {}, {})",
                    group.len(),
                    first.subject,
                    first.predicate,
                    first.object
                ),
                triple_ids: group.iter().map(|t| t.id).collect(),
                count: group.len(),
            });
        }

        if low_confidence > 0 {
            issues.push(QualityIssue {
                issue_type: IssueType::LowConfidence,
                severity: Severity::High,
                description: format!(
                    "{} triple(s) below confidence {}",
                    low_confidence, config.low_confidence_threshold
                ),
                triple_ids: Vec::new(),
                count: low_confidence,
            });
        }

        if stale > 0 {
            issues.push(QualityIssue {
                issue_type: IssueType::Stale,
                severity: Severity::Low,
                description: format!(
                    "{} triple(s) not updated in {} days",
                    stale, config.stale_days
                ),
                triple_ids: Vec::new(),
                count: stale,
            });
        }

        let issues_by_type = IssuesByType {
            duplicate: duplicate_groups.len(),
            low_confidence,
            stale,
        };
        let total_issues =
            issues_by_type.duplicate + issues_by_type.low_confidence + issues_by_type.stale;

        Self {
            timestamp: Utc::now(),
            total_issues,
            recommendations: recommendations(&issues_by_type, config),
            issues_by_type,
            issues,
        }
    }
}

fn recommendations(counts: &IssuesByType, config: &QualityConfig) -> Vec<String> {
    let mut out = Vec::new();
    if counts.duplicate > 0 {
        out.push(format!(
            "Merge {} duplicate group(s) to consolidate repeated facts",
            counts.duplicate
        ));
    }
    if counts.low_confidence > 0 {
        out.push(format!(
            "Review or delete {} triple(s) below confidence {}",
            counts.low_confidence, config.low_confidence_threshold
        ));
    }
    if counts.stale > 0 {
        out.push(format!(
            "Apply confidence decay to {} triple(s) older than {} days",
            counts.stale, config.stale_days
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValidatedBy;

    fn triple(id: i64) -> Triple {
        Triple {
            id: TripleId(id),
            subject: "company:a".to_string(),
            predicate: "supplies".to_string(),
            object: "company:b".to_string(),
            confidence: 0.5,
            validated_by: ValidatedBy::Baseline,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_report() {
        let report = QualityReport::build(&[], 0, 0, &QualityConfig::default());
        assert_eq!(report.total_issues, 0);
        assert_eq!(report.issues_by_type, IssuesByType::default());
        assert!(report.issues.is_empty());
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn test_duplicate_issue_lists_ids() {
        let groups = vec![vec![triple(1), triple(2)]];
        let report = QualityReport::build(&groups, 0, 0, &QualityConfig::default());
        assert_eq!(report.total_issues, 1);
        assert_eq!(report.issues[0].triple_ids, vec![TripleId(1), TripleId(2)]);
        assert_eq!(report.issues[0].severity, Severity::Medium);
    }

    #[test]
    fn test_report_wire_shape() {
        let report = QualityReport::build(&[], 4, 2, &QualityConfig::default());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["totalIssues"], 6);
        assert_eq!(json["issuesByType"]["lowConfidence"], 4);
        assert_eq!(json["issuesByType"]["stale"], 2);
        assert_eq!(json["issues"][0]["type"], "lowConfidence");
        assert!(json["issues"][0].get("tripleIds").is_none());
    }
}
