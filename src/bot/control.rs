//! Operator API: safety flags, follow-ups, goals, pages and maintenance.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ApiError;
use super::AppState;
use crate::agent::best_time::{self, BestTime};
use crate::agent::safety::{self, SafetyStatus};
use crate::db::models::{
    ActionLogEntry, Conversation, FollowUp, FollowUpStatus, Goal, GoalType, Message, Page,
};
use crate::followup::{ScheduleError, ScheduleOptions};

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/pages/{page_id}", put(upsert_page))
        .route("/api/conversations/{id}/safety", get(get_safety))
        .route("/api/conversations/{id}/takeover", post(set_takeover))
        .route("/api/conversations/{id}/ai", post(set_ai))
        .route("/api/conversations/{id}/opt-out", post(set_opt_out))
        .route("/api/conversations/{id}/best-time", get(get_best_time))
        .route("/api/conversations/{id}/messages", get(list_messages))
        .route(
            "/api/conversations/{id}/follow-ups",
            get(list_follow_ups).post(schedule_follow_up),
        )
        .route("/api/follow-ups/{id}/cancel", post(cancel_follow_up))
        .route(
            "/api/conversations/{id}/goal",
            get(get_goal).put(set_goal).delete(abandon_goal),
        )
        .route("/api/conversations/{id}/goal/progress", post(goal_progress))
        .route("/api/debug/follow-ups", get(debug_follow_ups))
        .route("/api/debug/actions", get(debug_actions))
        .route("/api/maintenance/cleanup", post(cleanup))
}

async fn load_conversation(state: &AppState, id: Uuid) -> Result<Conversation, ApiError> {
    state
        .store
        .get_conversation(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("conversation {} not found", id)))
}

// ── Pages ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PageBody {
    name: String,
    access_token: Option<String>,
}

async fn upsert_page(
    State(state): State<Arc<AppState>>,
    Path(page_id): Path<String>,
    Json(body): Json<PageBody>,
) -> ApiResult<Page> {
    let page = state
        .store
        .upsert_page(&page_id, &body.name, body.access_token.as_deref())
        .await?;
    Ok(Json(page))
}

// ── Safety flags ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct SafetyView {
    conversation_id: Uuid,
    #[serde(flatten)]
    safety: SafetyStatus,
}

async fn get_safety(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<SafetyView> {
    let conv = load_conversation(&state, id).await?;
    Ok(Json(SafetyView {
        conversation_id: id,
        safety: safety::evaluate(&conv, Utc::now()),
    }))
}

#[derive(Debug, Deserialize)]
struct TakeoverBody {
    enabled: bool,
    /// Minutes until the takeover lapses; 0 keeps it open until released.
    minutes: Option<i64>,
}

async fn set_takeover(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<TakeoverBody>,
) -> ApiResult<Conversation> {
    load_conversation(&state, id).await?;
    let until = match (body.enabled, body.minutes.unwrap_or(state.config.takeover_minutes)) {
        (false, _) => None,
        (true, m) if m <= 0 => None,
        (true, m) => Some(
            TimeDelta::try_minutes(m)
                .and_then(|d| Utc::now().checked_add_signed(d))
                .ok_or_else(|| ScheduleError::InvalidTime(format!("minutes {} is out of range", m)))?,
        ),
    };
    state.store.set_human_takeover(id, body.enabled, until).await?;
    state
        .store
        .log_action(
            Some(id),
            "human_takeover",
            serde_json::json!({ "enabled": body.enabled, "until": until, "source": "control_panel" }),
        )
        .await?;
    Ok(Json(load_conversation(&state, id).await?))
}

#[derive(Debug, Deserialize)]
struct AiBody {
    enabled: bool,
}

async fn set_ai(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<AiBody>,
) -> ApiResult<Conversation> {
    load_conversation(&state, id).await?;
    state.store.set_ai_enabled(id, body.enabled).await?;
    state
        .store
        .log_action(Some(id), "ai_toggled", serde_json::json!({ "enabled": body.enabled }))
        .await?;
    Ok(Json(load_conversation(&state, id).await?))
}

#[derive(Debug, Deserialize)]
struct OptOutBody {
    opt_out: bool,
}

async fn set_opt_out(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<OptOutBody>,
) -> ApiResult<Conversation> {
    load_conversation(&state, id).await?;
    state.store.set_opt_out(id, body.opt_out).await?;
    if body.opt_out {
        state.scheduler.cancel_for_conversation(id, "opt_out").await?;
    }
    state
        .store
        .log_action(Some(id), "opt_out", serde_json::json!({ "opt_out": body.opt_out }))
        .await?;
    Ok(Json(load_conversation(&state, id).await?))
}

async fn get_best_time(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<BestTime> {
    load_conversation(&state, id).await?;
    let best = best_time::best_time_for(state.store.as_ref(), id, Utc::now()).await?;
    Ok(Json(best))
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<i64>,
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<Message>> {
    load_conversation(&state, id).await?;
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    Ok(Json(state.store.recent_messages(id, limit).await?))
}

// ── Follow-ups ────────────────────────────────────────────────────

async fn list_follow_ups(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<FollowUp>> {
    Ok(Json(state.scheduler.list_for_conversation(id).await?))
}

async fn schedule_follow_up(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(options): Json<ScheduleOptions>,
) -> ApiResult<FollowUp> {
    Ok(Json(state.scheduler.schedule(id, options, Utc::now()).await?))
}

#[derive(Debug, Default, Deserialize)]
struct CancelBody {
    #[serde(default)]
    reason: Option<String>,
}

async fn cancel_follow_up(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<CancelBody>,
) -> ApiResult<FollowUp> {
    let reason = body.reason.as_deref().unwrap_or("cancelled_by_operator");
    Ok(Json(state.scheduler.cancel(id, reason).await?))
}

#[derive(Debug, Deserialize)]
struct DebugQuery {
    status: Option<String>,
    limit: Option<i64>,
}

async fn debug_follow_ups(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DebugQuery>,
) -> ApiResult<Vec<FollowUp>> {
    let status: FollowUpStatus = query
        .status
        .as_deref()
        .unwrap_or("failed")
        .parse()
        .map_err(|e: crate::db::models::UnknownVariant| ApiError::BadRequest(e.to_string()))?;
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    Ok(Json(state.scheduler.list_by_status(status, limit).await?))
}

#[derive(Debug, Deserialize)]
struct ActionsQuery {
    conversation_id: Option<Uuid>,
    limit: Option<i64>,
}

async fn debug_actions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ActionsQuery>,
) -> ApiResult<Vec<ActionLogEntry>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    Ok(Json(
        state
            .store
            .recent_actions(query.conversation_id, limit)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
struct CleanupBody {
    #[serde(default = "default_retention_days")]
    older_than_days: i64,
}

fn default_retention_days() -> i64 {
    30
}

async fn cleanup(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CleanupBody>,
) -> ApiResult<serde_json::Value> {
    if body.older_than_days < 1 {
        return Err(ApiError::BadRequest("older_than_days must be at least 1".to_string()));
    }
    let older_than = TimeDelta::try_days(body.older_than_days).ok_or_else(|| {
        ScheduleError::InvalidTime(format!("older_than_days {} is out of range", body.older_than_days))
    })?;
    let deleted = state.scheduler.cleanup(older_than, Utc::now()).await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

// ── Goals ─────────────────────────────────────────────────────────

async fn get_goal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Goal> {
    state
        .goals
        .get_active_goal(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("conversation {} has no active goal", id)))
}

#[derive(Debug, Deserialize)]
struct GoalBody {
    goal_type: GoalType,
    goal_prompt: Option<String>,
}

async fn set_goal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<GoalBody>,
) -> ApiResult<Goal> {
    let goal = state
        .goals
        .set_goal(id, body.goal_type, body.goal_prompt.as_deref())
        .await?;
    Ok(Json(goal))
}

async fn abandon_goal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Goal> {
    Ok(Json(state.goals.abandon_goal(id).await?))
}

#[derive(Debug, Deserialize)]
struct ProgressBody {
    score: f64,
}

async fn goal_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<ProgressBody>,
) -> ApiResult<Goal> {
    Ok(Json(state.goals.record_progress(id, body.score).await?))
}
