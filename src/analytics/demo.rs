//! Deterministic sample data served when the store is unreachable
//!
//! Every view built here carries `is_demo: true` so clients can tell it
//! apart from real data. Nothing in this module touches the store or cache.

use super::{AnalyticsSummary, GraphView, InsightKind, InsightsView, Period};
use super::insights::{basic_insights, InsightSource};
use crate::types::{Triple, TripleId, ValidatedBy};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};

const SAMPLE: &[(&str, &str, &str, f64)] = &[
    ("company:acme", "supplies", "company:globex", 0.92),
    ("company:acme", "partners_with", "company:initech", 0.81),
    ("company:globex", "competes_with", "company:initech", 0.67),
    ("company:initech", "acquired", "company:hooli", 0.74),
    ("company:hooli", "supplies", "company:acme", 0.58),
    ("person:jane_doe", "ceo_of", "company:acme", 0.95),
    ("person:john_roe", "board_member_of", "company:globex", 0.43),
    ("company:umbrella", "invests_in", "company:hooli", 0.31),
    ("company:globex", "supplies", "company:umbrella", 0.88),
    ("company:acme", "competes_with", "company:umbrella", 0.22),
];

fn anchor() -> DateTime<Utc> {
    // Fixed so the sample is identical on every call
    Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

pub fn sample_triples() -> Vec<Triple> {
    SAMPLE
        .iter()
        .enumerate()
        .map(|(i, (s, p, o, c))| {
            let created = anchor() - ChronoDuration::days(i as i64);
            Triple {
                id: TripleId(i as i64 + 1),
                subject: s.to_string(),
                predicate: p.to_string(),
                object: o.to_string(),
                confidence: *c,
                validated_by: match i % 3 {
                    0 => ValidatedBy::Gpt,
                    1 => ValidatedBy::User,
                    _ => ValidatedBy::Baseline,
                },
                created_at: created,
                updated_at: created,
            }
        })
        .collect()
}

pub fn analytics(period: Period) -> AnalyticsSummary {
    let mut summary = AnalyticsSummary::from_triples(period, &sample_triples());
    summary.is_demo = true;
    summary
}

pub fn graph(limit: usize, min_confidence: f64) -> GraphView {
    let triples: Vec<Triple> = sample_triples()
        .into_iter()
        .filter(|t| t.confidence >= min_confidence)
        .take(limit)
        .collect();
    let mut view = GraphView::from_triples(&triples);
    view.is_demo = true;
    view
}

pub fn insights(kind: InsightKind) -> InsightsView {
    InsightsView {
        kind,
        source: InsightSource::Basic,
        insights: basic_insights(kind, &sample_triples()),
        generated_at: anchor(),
        is_demo: true,
    }
}
