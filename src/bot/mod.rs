pub mod auth;
pub mod control;
pub mod cron;
pub mod error;
pub mod webhook;

use std::sync::Arc;

use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::agent::goals::GoalController;
use crate::ai::llm::ChatCompletion;
use crate::config::AppConfig;
use crate::db::Store;
use crate::followup::{FollowUpProcessor, FollowUpScheduler};
use crate::messenger::Messenger;

/// Shared application state, accessible from all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn Store>,
    pub scheduler: Arc<FollowUpScheduler>,
    pub processor: Arc<FollowUpProcessor>,
    pub goals: GoalController,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn Store>,
        messenger: Arc<dyn Messenger>,
        llm: Option<Arc<dyn ChatCompletion>>,
    ) -> Self {
        let scheduler = Arc::new(FollowUpScheduler::new(store.clone(), &config));
        let processor = Arc::new(FollowUpProcessor::new(
            scheduler.clone(),
            messenger,
            llm,
            &config,
        ));
        Self {
            goals: GoalController::new(store.clone()),
            config,
            store,
            scheduler,
            processor,
        }
    }
}

/// Build the HTTP router: webhook, cron trigger and control panel.
pub fn build_router(state: Arc<AppState>) -> Router {
    let control = control::routes().route_layer(middleware::from_fn_with_state(
        state.clone(),
        auth::require_admin,
    ));

    Router::new()
        .route("/health", get(health))
        .route("/webhook", get(webhook::verify).post(webhook::receive))
        .route(
            "/api/cron/follow-ups",
            get(cron::run_follow_ups).post(cron::run_follow_ups),
        )
        .merge(control)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
