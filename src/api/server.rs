use super::handlers::{
    analytics_handler, create_triple_handler, graph_handler, health_handler, insights_handler,
    job_status_handler, list_feedback_handler, quality_action_handler, quality_report_handler,
    scheduler_action_handler, submit_feedback_handler,
};
use crate::analytics::{AnalyticsService, ChatInsightProvider, InsightProvider};
use crate::cache::Cache;
use crate::config::AppConfig;
use crate::error::Result;
use crate::quality::QualityEngine;
use crate::scheduler::JobScheduler;
use crate::storage::{LibsqlStore, TripleStore};
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info};

/// Shared handler state; every component is injected here at startup
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<QualityEngine>,
    pub scheduler: Arc<JobScheduler>,
    pub analytics: Arc<AnalyticsService>,
    pub cache: Arc<Cache>,
}

impl AppState {
    /// Wire every component around an already-open store
    pub fn new(store: Arc<dyn TripleStore>, config: &AppConfig) -> Result<Self> {
        let cache = Arc::new(Cache::from_config(&config.cache));
        let engine = Arc::new(QualityEngine::new(
            store.clone(),
            cache.clone(),
            config.quality.clone(),
        ));

        let provider = ChatInsightProvider::from_config(&config.insights)?
            .map(|p| Arc::new(p) as Arc<dyn InsightProvider>);
        if provider.is_none() {
            info!("No insight API key configured; insights use the basic generator");
        }
        let analytics = Arc::new(
            AnalyticsService::new(store, cache.clone(), provider, config.insights.timeout)
                .with_insight_lookback(config.insights.lookback_days),
        );

        let scheduler = Arc::new(JobScheduler::with_default_jobs(
            engine.clone(),
            config,
            cache.clone(),
        )?);

        Ok(Self {
            engine,
            scheduler,
            analytics,
            cache,
        })
    }

    /// Open the configured database and wire every component
    pub async fn open(config: &AppConfig) -> Result<Self> {
        let store = LibsqlStore::connect(&config.database.path).await?;
        info!("Opened triple store at {}", store.path());
        Self::new(Arc::new(store), config)
    }
}

/// Build router
pub fn router(state: AppState) -> Router {
    Router::new()
        // Lifecycle
        .route("/api/quality", get(quality_report_handler).post(quality_action_handler))
        .route("/api/feedback", get(list_feedback_handler).post(submit_feedback_handler))
        .route("/api/scheduler", get(job_status_handler).post(scheduler_action_handler))
        .route("/api/triples", axum::routing::post(create_triple_handler))
        // Derived views
        .route("/api/analytics", get(analytics_handler))
        .route("/api/graph", get(graph_handler))
        .route("/api/insights", get(insights_handler))
        // Health check
        .route("/api/health", get(health_handler))
        // State
        .with_state(state)
        // Middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// API server
pub struct ApiServer {
    addr: SocketAddr,
    state: AppState,
    start_scheduler: bool,
    /// Shutdown signal for the serve loop
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl ApiServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        Self {
            addr,
            state,
            start_scheduler: true,
            shutdown_tx,
        }
    }

    /// Serve the API only; jobs can still be run through the scheduler endpoint
    pub fn without_scheduler(mut self) -> Self {
        self.start_scheduler = false;
        self
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Handle that stops `serve` when sent to
    pub fn shutdown_handle(&self) -> tokio::sync::broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Start the scheduler and serve until Ctrl-C or a shutdown signal
    pub async fn serve(self) -> anyhow::Result<()> {
        if self.start_scheduler {
            self.state.scheduler.initialize().await;
        }

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!("API server listening on http://{}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let app = router(self.state.clone());
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received Ctrl-C, shutting down");
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("API server received shutdown signal");
                    }
                }
            })
            .await?;

        // Running jobs finish; no new ticks are scheduled
        self.state.scheduler.stop_all().await;
        info!("API server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_utils::create_test_store;
    use axum::extract::State;

    #[tokio::test]
    async fn test_state_wiring() {
        let (_dir, store) = create_test_store().await;
        let state = AppState::new(Arc::new(store), &AppConfig::default()).unwrap();

        assert!(state.cache.is_enabled());
        assert!(!state.scheduler.is_initialized());
        assert_eq!(state.scheduler.get_job_status(None).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (_dir, store) = create_test_store().await;
        let state = AppState::new(Arc::new(store), &AppConfig::default()).unwrap();

        let response = health_handler(State(state)).await;
        assert_eq!(response.0.status, "ok");
        assert_eq!(response.0.store, "ok");
    }

    #[tokio::test]
    async fn test_health_reports_unreachable_store() {
        let store = Arc::new(crate::storage::test_utils::UnreachableStore);
        let state = AppState::new(store, &AppConfig::default()).unwrap();

        let response = health_handler(State(state)).await;
        assert_eq!(response.0.status, "degraded");
        assert_eq!(response.0.store, "unavailable");
    }
}
