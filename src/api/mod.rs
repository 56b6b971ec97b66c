//! HTTP API for the quality engine
//!
//! Provides:
//! - Quality report and maintenance actions
//! - Feedback submission and history
//! - Scheduler status and control
//! - Cached analytics, graph and insight views
//! - Triple ingestion and health

pub mod handlers;
pub mod server;

pub use server::{router, ApiServer, AppState};
