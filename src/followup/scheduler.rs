use std::sync::Arc;

use chrono::{DateTime, Duration, TimeDelta, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::agent::best_time;
use crate::config::AppConfig;
use crate::db::models::{FollowUp, FollowUpStatus, FollowUpType, NewFollowUp};
use crate::db::Store;

pub const DEFAULT_MAX_RETRIES: i32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("conversation {0} not found")]
    ConversationNotFound(Uuid),
    #[error("follow-up {0} not found")]
    NotFound(Uuid),
    #[error("contact has opted out of automated messages")]
    OptedOut,
    #[error("invalid time: {0}")]
    InvalidTime(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// How to pick the send time. First set field wins: `scheduled_at`, then
/// `use_best_time`, then `delay_hours`, then the default delay.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleOptions {
    pub follow_up_type: FollowUpType,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub use_best_time: bool,
    pub delay_hours: Option<f64>,
    pub message_template: Option<String>,
    pub goal_id: Option<Uuid>,
    pub max_retries: Option<i32>,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            follow_up_type: FollowUpType::Initial,
            scheduled_at: None,
            use_best_time: false,
            delay_hours: None,
            message_template: None,
            goal_id: None,
            max_retries: None,
        }
    }
}

/// `now` plus a delay in (fractional) hours, rejecting values chrono can't hold.
fn delay_from(now: DateTime<Utc>, hours: f64) -> Result<DateTime<Utc>, ScheduleError> {
    let out_of_range = || ScheduleError::InvalidTime(format!("delay_hours {} is out of range", hours));
    if !hours.is_finite() {
        return Err(out_of_range());
    }
    let seconds = (hours.max(0.0) * 3600.0).round();
    if seconds >= i64::MAX as f64 {
        return Err(out_of_range());
    }
    TimeDelta::try_seconds(seconds as i64)
        .and_then(|delay| now.checked_add_signed(delay))
        .ok_or_else(out_of_range)
}

pub struct FollowUpScheduler {
    store: Arc<dyn Store>,
    default_delay: Duration,
    retry_backoff: Duration,
}

impl FollowUpScheduler {
    pub fn new(store: Arc<dyn Store>, config: &AppConfig) -> Self {
        Self {
            store,
            default_delay: Duration::hours(config.default_delay_hours),
            retry_backoff: Duration::hours(config.retry_backoff_hours),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Create a pending follow-up, superseding any other pending one for the
    /// same conversation.
    ///
    /// The cancel and the insert are separate statements; two concurrent
    /// calls can both leave a pending row behind.
    pub async fn schedule(
        &self,
        conversation_id: Uuid,
        options: ScheduleOptions,
        now: DateTime<Utc>,
    ) -> Result<FollowUp, ScheduleError> {
        let conv = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or(ScheduleError::ConversationNotFound(conversation_id))?;

        if conv.opt_out {
            return Err(ScheduleError::OptedOut);
        }

        let target = if let Some(at) = options.scheduled_at {
            at
        } else if options.use_best_time {
            best_time::best_time_for(self.store.as_ref(), conversation_id, now)
                .await?
                .next_time
        } else if let Some(hours) = options.delay_hours {
            delay_from(now, hours)?
        } else {
            now + self.default_delay
        };

        // Never earlier than the cooldown.
        let scheduled_at = match conv.cooldown_until {
            Some(cooldown) if cooldown > target => cooldown,
            _ => target,
        };

        let goal_id = match options.goal_id {
            Some(id) => Some(id),
            None => self.store.active_goal(conversation_id).await?.map(|g| g.id),
        };

        let superseded = self
            .store
            .cancel_pending_follow_ups(conversation_id, "superseded")
            .await?;

        let follow_up = self
            .store
            .insert_follow_up(&NewFollowUp {
                conversation_id,
                page_id: conv.page_id.clone(),
                goal_id,
                follow_up_type: options.follow_up_type,
                scheduled_at,
                max_retries: options.max_retries.unwrap_or(DEFAULT_MAX_RETRIES).max(1),
                message_template: options
                    .message_template
                    .filter(|t| !t.trim().is_empty()),
            })
            .await?;

        self.store
            .log_action(
                Some(conversation_id),
                "follow_up_scheduled",
                serde_json::json!({
                    "follow_up_id": follow_up.id,
                    "type": follow_up.follow_up_type.as_str(),
                    "scheduled_at": follow_up.scheduled_at,
                    "superseded": superseded,
                }),
            )
            .await?;

        tracing::info!(
            "Scheduled {} follow-up {} for conv {} at {} (superseded {})",
            follow_up.follow_up_type,
            follow_up.id,
            conversation_id,
            follow_up.scheduled_at,
            superseded
        );
        Ok(follow_up)
    }

    async fn load(&self, id: Uuid) -> Result<FollowUp, ScheduleError> {
        self.store
            .get_follow_up(id)
            .await?
            .ok_or(ScheduleError::NotFound(id))
    }

    /// Cancel a pending follow-up. Terminal entries are returned untouched.
    pub async fn cancel(&self, id: Uuid, reason: &str) -> Result<FollowUp, ScheduleError> {
        let mut follow_up = self.load(id).await?;
        if follow_up.status.is_terminal() {
            return Ok(follow_up);
        }
        follow_up.status = FollowUpStatus::Cancelled;
        follow_up.error_message = Some(reason.to_string());
        self.store.update_follow_up(&follow_up).await?;
        tracing::info!("Cancelled follow-up {}: {}", id, reason);
        Ok(follow_up)
    }

    pub async fn cancel_for_conversation(
        &self,
        conversation_id: Uuid,
        reason: &str,
    ) -> Result<u64, ScheduleError> {
        Ok(self
            .store
            .cancel_pending_follow_ups(conversation_id, reason)
            .await?)
    }

    pub async fn mark_sent(
        &self,
        id: Uuid,
        message_id: &str,
        now: DateTime<Utc>,
    ) -> Result<FollowUp, ScheduleError> {
        let mut follow_up = self.load(id).await?;
        follow_up.status = FollowUpStatus::Sent;
        follow_up.sent_message_id = Some(message_id.to_string());
        follow_up.sent_at = Some(now);
        follow_up.error_message = None;
        self.store.update_follow_up(&follow_up).await?;
        Ok(follow_up)
    }

    /// Count a failed attempt. Under `max_retries` the entry goes back to
    /// pending after the backoff; otherwise it is failed for good.
    pub async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<FollowUp, ScheduleError> {
        let mut follow_up = self.load(id).await?;
        if follow_up.status.is_terminal() {
            return Ok(follow_up);
        }

        follow_up.retry_count += 1;
        follow_up.error_message = Some(error.to_string());
        if follow_up.retry_count < follow_up.max_retries {
            follow_up.status = FollowUpStatus::Pending;
            follow_up.scheduled_at = now + self.retry_backoff;
        } else {
            follow_up.status = FollowUpStatus::Failed;
        }
        self.store.update_follow_up(&follow_up).await?;
        Ok(follow_up)
    }

    /// Fail without consuming a retry (misconfiguration, missing data).
    pub async fn mark_failed_permanently(
        &self,
        id: Uuid,
        error: &str,
    ) -> Result<FollowUp, ScheduleError> {
        let mut follow_up = self.load(id).await?;
        follow_up.status = FollowUpStatus::Failed;
        follow_up.error_message = Some(error.to_string());
        self.store.update_follow_up(&follow_up).await?;
        Ok(follow_up)
    }

    pub async fn mark_skipped(&self, id: Uuid, reason: &str) -> Result<FollowUp, ScheduleError> {
        let mut follow_up = self.load(id).await?;
        follow_up.status = FollowUpStatus::Skipped;
        follow_up.error_message = Some(reason.to_string());
        self.store.update_follow_up(&follow_up).await?;
        Ok(follow_up)
    }

    /// Move a pending entry to a new time.
    pub async fn reschedule(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<FollowUp, ScheduleError> {
        let mut follow_up = self.load(id).await?;
        if follow_up.status.is_terminal() {
            return Ok(follow_up);
        }
        follow_up.scheduled_at = at;
        self.store.update_follow_up(&follow_up).await?;
        Ok(follow_up)
    }

    pub async fn list_for_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<FollowUp>, ScheduleError> {
        Ok(self.store.list_follow_ups(conversation_id).await?)
    }

    pub async fn list_by_status(
        &self,
        status: FollowUpStatus,
        limit: i64,
    ) -> Result<Vec<FollowUp>, ScheduleError> {
        Ok(self.store.follow_ups_by_status(status, limit).await?)
    }

    /// Delete terminal entries untouched for `older_than`.
    pub async fn cleanup(
        &self,
        older_than: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, ScheduleError> {
        let cutoff = now.checked_sub_signed(older_than).ok_or_else(|| {
            ScheduleError::InvalidTime("retention period is out of range".to_string())
        })?;
        let deleted = self.store.delete_terminal_follow_ups(cutoff).await?;
        self.store
            .log_action(
                None,
                "follow_up_cleanup",
                serde_json::json!({ "deleted": deleted }),
            )
            .await?;
        tracing::info!("Cleanup removed {} terminal follow-ups", deleted);
        Ok(deleted)
    }
}
