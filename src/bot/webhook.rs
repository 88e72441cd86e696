//! Messenger webhook: verification handshake and event intake.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::Deserialize;

use super::auth;
use super::error::ApiError;
use super::AppState;
use crate::agent::safety;
use crate::db::models::{Direction, NewEngagement};
use crate::followup::{ScheduleError, ScheduleOptions};
use crate::messenger::payload::{Event, WebhookPayload};

const OPT_OUT_KEYWORDS: &[&str] = &[
    "stop",
    "stop all",
    "unsubscribe",
    "opt out",
    "optout",
    "opt-out",
    "cancel",
    "end",
    "quit",
];

const OPT_OUT_PHRASES: &[&str] = &[
    "stop messaging",
    "stop texting",
    "stop sending",
    "don't message me",
    "do not message me",
    "dont message me",
    "remove me from",
];

/// Whether an inbound text asks us to stop automated messages.
pub fn is_opt_out(text: &str) -> bool {
    let normalized = text
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .to_lowercase()
        .replace('\u{2019}', "'");
    OPT_OUT_KEYWORDS.contains(&normalized.as_str())
        || OPT_OUT_PHRASES.iter().any(|p| normalized.contains(p))
}

/// Score an inbound message in 0..=1.
pub fn engagement_score(text: &str, latency_seconds: Option<i64>) -> f64 {
    let mut score = 0.4;
    if latency_seconds.is_some_and(|s| s <= 3600) {
        score += 0.3;
    }
    if text.chars().count() > 20 {
        score += 0.2;
    }
    if text.contains('?') {
        score += 0.1;
    }
    f64::min(score, 1.0)
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

pub async fn verify(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VerifyQuery>,
) -> impl IntoResponse {
    let Some(expected) = state.config.fb_verify_token.as_deref() else {
        tracing::warn!("Webhook verification attempted but FB_VERIFY_TOKEN is not set");
        return (StatusCode::FORBIDDEN, "verification disabled".to_string());
    };

    if params.mode.as_deref() != Some("subscribe") {
        return (StatusCode::FORBIDDEN, "invalid mode".to_string());
    }

    if params.verify_token.as_deref() == Some(expected) {
        tracing::info!("Webhook verification successful");
        (StatusCode::OK, params.challenge.unwrap_or_default())
    } else {
        tracing::warn!("Invalid webhook verify token");
        (StatusCode::FORBIDDEN, "invalid verify token".to_string())
    }
}

pub async fn receive(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    if let Some(secret) = state.config.fb_app_secret.as_deref() {
        let header = headers
            .get(auth::SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        if !auth::verify_signature(secret, &body, header) {
            tracing::warn!("Rejected webhook post with bad signature");
            return Err(ApiError::Forbidden("invalid signature".to_string()));
        }
    }

    let payload: WebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid payload: {}", e)))?;

    if !payload.is_page() {
        tracing::debug!("Ignoring webhook object '{}'", payload.object);
        return Ok("IGNORED");
    }

    let now = Utc::now();
    for event in payload.events() {
        if let Err(e) = handle_event(&state, event, now).await {
            tracing::error!("Failed to handle webhook event: {:#}", e);
        }
    }

    Ok("EVENT_RECEIVED")
}

async fn handle_event(state: &AppState, event: Event, now: DateTime<Utc>) -> anyhow::Result<()> {
    match event {
        Event::Inbound {
            page_id,
            participant_id,
            text,
            mid,
            at,
        } => handle_inbound(state, &page_id, &participant_id, &text, mid.as_deref(), at, now).await,
        Event::HumanReply {
            page_id,
            participant_id,
            text,
            mid,
        } => handle_human_reply(state, &page_id, &participant_id, &text, mid.as_deref(), now).await,
    }
}

async fn handle_inbound(
    state: &AppState,
    page_id: &str,
    participant_id: &str,
    text: &str,
    mid: Option<&str>,
    at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let store = &state.store;
    let conv = store.upsert_conversation(page_id, participant_id).await?;

    let last_outbound = store.last_outbound_at(conv.id).await?;
    store
        .save_message(conv.id, Direction::Inbound, text, mid)
        .await?;
    store.set_last_message_time(conv.id, at).await?;

    let latency = last_outbound
        .map(|out| (at - out).num_seconds())
        .filter(|s| *s >= 0);
    store
        .insert_engagement(&NewEngagement {
            conversation_id: conv.id,
            day_of_week: at.weekday().num_days_from_sunday() as i32,
            hour_of_day: at.hour() as i32,
            response_latency_seconds: latency,
            engagement_score: engagement_score(text, latency),
        })
        .await?;

    let cancelled = state
        .scheduler
        .cancel_for_conversation(conv.id, "contact_replied")
        .await?;
    if cancelled > 0 {
        tracing::info!("Contact replied; cancelled {} follow-ups for conv {}", cancelled, conv.id);
    }

    if is_opt_out(text) {
        store.set_opt_out(conv.id, true).await?;
        store
            .log_action(
                Some(conv.id),
                "opt_out",
                serde_json::json!({ "text": text, "mid": mid }),
            )
            .await?;
        tracing::info!("Conv {} opted out", conv.id);
        return Ok(());
    }

    store
        .log_action(
            Some(conv.id),
            "message_received",
            serde_json::json!({ "mid": mid, "latency_seconds": latency }),
        )
        .await?;

    if !state.config.auto_follow_up {
        return Ok(());
    }

    // Re-read so the check sees the flags as they are now.
    let Some(conv) = store.get_conversation(conv.id).await? else {
        return Ok(());
    };
    let status = safety::evaluate(&conv, now);
    if status.reason().is_some_and(|r| r.is_terminal()) {
        return Ok(());
    }

    match state
        .scheduler
        .schedule(conv.id, ScheduleOptions::default(), now)
        .await
    {
        Ok(_) | Err(ScheduleError::OptedOut) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn handle_human_reply(
    state: &AppState,
    page_id: &str,
    participant_id: &str,
    text: &str,
    mid: Option<&str>,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let store = &state.store;
    let conv = store.upsert_conversation(page_id, participant_id).await?;
    store
        .save_message(conv.id, Direction::Outbound, text, mid)
        .await?;

    let until = now + Duration::minutes(state.config.takeover_minutes);
    store.set_human_takeover(conv.id, true, Some(until)).await?;
    store
        .log_action(
            Some(conv.id),
            "human_takeover",
            serde_json::json!({ "until": until, "source": "page_inbox" }),
        )
        .await?;
    tracing::info!("Human takeover on conv {} until {}", conv.id, until);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::testing::app;
    use crate::config::AppConfig;
    use crate::db::models::{FollowUpStatus, FollowUpType};
    use axum::body::Body;
    use axum::http::Request;

    fn inbound(psid: &str, text: &str) -> serde_json::Value {
        serde_json::json!({
            "object": "page",
            "entry": [{
                "id": "PAGE1",
                "messaging": [{
                    "sender": {"id": psid},
                    "recipient": {"id": "PAGE1"},
                    "timestamp": Utc::now().timestamp_millis(),
                    "message": {"mid": "m_in", "text": text}
                }]
            }]
        })
    }

    #[test]
    fn test_opt_out_keywords() {
        assert!(is_opt_out("STOP"));
        assert!(is_opt_out("  unsubscribe. "));
        assert!(is_opt_out("Please stop messaging me"));
        assert!(is_opt_out("Don\u{2019}t message me again"));
        assert!(!is_opt_out("Don't stop, this is great"));
        assert!(!is_opt_out("When does the sale end?"));
    }

    #[test]
    fn test_engagement_score() {
        assert!((engagement_score("ok", None) - 0.4).abs() < 1e-9);
        assert!((engagement_score("ok", Some(7200)) - 0.4).abs() < 1e-9);
        assert!((engagement_score("ok", Some(120)) - 0.7).abs() < 1e-9);
        let long_question = "Could you tell me more about the pricing?";
        assert!((engagement_score(long_question, Some(60)) - 1.0).abs() < 1e-9);
        assert!((engagement_score(long_question, None) - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_verify_handshake() {
        let mut config = AppConfig::for_tests();
        config.fb_verify_token = Some("verify-me".to_string());
        let app = app(config);

        let (status, body) = app
            .get("/webhook?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=12345")
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!(12345));

        let (status, _) = app
            .get("/webhook?hub.mode=subscribe&hub.verify_token=nope&hub.challenge=12345")
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_inbound_records_and_schedules() {
        let app = app(AppConfig::for_tests());
        let (status, _) = app
            .json("POST", "/webhook", inbound("USER1", "Is this still available?"))
            .await;
        assert_eq!(status, StatusCode::OK);

        let messages = app.store.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].direction, Direction::Inbound);

        let engagement = app.store.engagement();
        assert_eq!(engagement.len(), 1);
        assert!((engagement[0].engagement_score - 0.7).abs() < 1e-9);

        let follow_ups = app.store.follow_ups();
        assert_eq!(follow_ups.len(), 1);
        assert_eq!(follow_ups[0].status, FollowUpStatus::Pending);
        assert_eq!(follow_ups[0].follow_up_type, FollowUpType::Initial);

        let conv = app.store.conversation(follow_ups[0].conversation_id);
        assert!(conv.last_message_time.is_some());
    }

    #[tokio::test]
    async fn test_reply_cancels_pending_and_reschedules() {
        let app = app(AppConfig::for_tests());
        app.json("POST", "/webhook", inbound("USER1", "hello")).await;
        let first = app.store.follow_ups()[0].id;

        app.json("POST", "/webhook", inbound("USER1", "still there?")).await;
        let first = app.store.follow_up(first);
        assert_eq!(first.status, FollowUpStatus::Cancelled);
        assert_eq!(first.error_message.as_deref(), Some("contact_replied"));

        let pending: Vec<_> = app
            .store
            .follow_ups()
            .into_iter()
            .filter(|f| f.status == FollowUpStatus::Pending)
            .collect();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_opt_out_message() {
        let app = app(AppConfig::for_tests());
        app.json("POST", "/webhook", inbound("USER1", "hi")).await;
        app.json("POST", "/webhook", inbound("USER1", "STOP")).await;

        let follow_ups = app.store.follow_ups();
        let conv = app.store.conversation(follow_ups[0].conversation_id);
        assert!(conv.opt_out);
        assert!(follow_ups.iter().all(|f| f.status != FollowUpStatus::Pending));
        assert!(app.store.actions().iter().any(|a| a.action == "opt_out"));
    }

    #[tokio::test]
    async fn test_page_echo_starts_takeover() {
        let app = app(AppConfig::for_tests());
        let payload = serde_json::json!({
            "object": "page",
            "entry": [{
                "id": "PAGE1",
                "messaging": [{
                    "sender": {"id": "PAGE1"},
                    "recipient": {"id": "USER1"},
                    "message": {"mid": "m_echo", "text": "Hi, Sam here!", "is_echo": true}
                }]
            }]
        });
        app.json("POST", "/webhook", payload).await;

        let messages = app.store.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].direction, Direction::Outbound);
        let conv = app.store.conversation(messages[0].conversation_id);
        assert!(conv.human_takeover);
        assert!(conv.takeover_until.is_some_and(|t| t > Utc::now()));
    }

    #[tokio::test]
    async fn test_signature_enforced_when_secret_set() {
        let mut config = AppConfig::for_tests();
        config.fb_app_secret = Some("app-secret".to_string());
        let app = app(config);
        let body = inbound("USER1", "hello").to_string();

        let (status, _) = app
            .send(
                Request::post("/webhook")
                    .header("content-type", "application/json")
                    .body(Body::from(body.clone()))
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(app.store.messages().is_empty());

        let (status, _) = app
            .send(
                Request::post("/webhook")
                    .header("content-type", "application/json")
                    .header(auth::SIGNATURE_HEADER, auth::sign("app-secret", body.as_bytes()))
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(app.store.messages().len(), 1);
    }
}
