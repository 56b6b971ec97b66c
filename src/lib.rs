//! kg-quality - Data Quality & Confidence Lifecycle Engine
//!
//! Maintains the confidence of knowledge triples extracted from business
//! documents:
//! - User feedback (approve / reject / adjust) applied transactionally
//! - Time-based decay, low-confidence pruning, duplicate merging, archiving
//! - Cron-scheduled maintenance jobs with manual run and enable/disable
//! - TTL cache over derived analytics, graph and insight views
//!
//! # Architecture
//!
//! - **Types**: Core data structures (Triple, FeedbackRecord, etc.)
//! - **Storage**: `TripleStore` accessor over libsql
//! - **Cache**: TTL + LRU cache with pattern invalidation
//! - **Quality**: The confidence lifecycle engine and quality report
//! - **Scheduler**: Cron-driven background jobs
//! - **Analytics**: Aggregates, graph projection, insights
//! - **API**: axum HTTP surface
//!
//! # Example
//!
//! ```ignore
//! use kg_quality::{AppConfig, AppState, FeedbackAction, TripleId};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load(None)?;
//!     let state = AppState::open(&config).await?;
//!
//!     let outcome = state
//!         .engine
//!         .apply_feedback(TripleId(50), FeedbackAction::Approve, None)
//!         .await?;
//!     println!("{}", outcome.message);
//!
//!     let report = state.engine.report().await?;
//!     println!("{} issue(s)", report.total_issues);
//!     Ok(())
//! }
//! ```

pub mod analytics;
pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod quality;
pub mod scheduler;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use analytics::{AnalyticsService, InsightKind, Period};
pub use api::{router, ApiServer, AppState};
pub use cache::{Cache, CacheStore, CacheTtl, MemoryCacheStore};
pub use config::AppConfig;
pub use error::{QualityError, Result};
pub use quality::{QualityAction, QualityEngine, QualityReport};
pub use scheduler::{CronSchedule, JobHandler, JobReport, JobScheduler, JobStatus};
pub use storage::{LibsqlStore, MergeOutcome, TripleStore};
pub use types::{
    FeedbackAction, FeedbackKind, FeedbackRecord, NewTriple, Triple, TripleFilter, TripleId,
    ValidatedBy,
};
