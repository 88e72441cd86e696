use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use tokio::time::{interval, Duration, MissedTickBehavior};

use super::auth;
use super::error::ApiError;
use super::AppState;
use crate::followup::{FollowUpProcessor, ProcessSummary};

/// Run one processor batch. Invoked by an external scheduler.
pub async fn run_follow_ups(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ProcessSummary>, ApiError> {
    if !auth::cron_authorized(&state.config, &headers) {
        tracing::warn!("Rejected unauthorized cron call");
        return Err(ApiError::Unauthorized);
    }
    let summary = state.processor.process_due(Utc::now()).await?;
    Ok(Json(summary))
}

/// In-process alternative to the external cron trigger.
pub struct CronLoop {
    processor: Arc<FollowUpProcessor>,
    poll_interval: Duration,
}

impl CronLoop {
    pub fn new(processor: Arc<FollowUpProcessor>, poll_interval_secs: u64) -> Self {
        Self {
            processor,
            poll_interval: Duration::from_secs(poll_interval_secs.max(1)),
        }
    }

    pub async fn run(self) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.processor.process_due(Utc::now()).await {
                tracing::error!("Follow-up cycle failed: {:#}", e);
            }
        }
    }
}
