use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::scheduler::FollowUpScheduler;
use crate::agent::safety::{self, SafetyStatus};
use crate::ai::compose;
use crate::ai::llm::ChatCompletion;
use crate::config::AppConfig;
use crate::db::models::{Direction, FollowUp};
use crate::db::Store;
use crate::messenger::{send_within_policy, Messenger, SendRequest};

/// Result of one processor run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ProcessSummary {
    pub processed: usize,
    pub sent: usize,
    pub skipped: usize,
    pub rescheduled: usize,
    pub failed: usize,
    /// Send failures put back to pending for another attempt
    pub retried: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Sent { message_id: String, tagged: bool },
    Skipped(&'static str),
    Rescheduled(DateTime<Utc>),
    Failed(String),
    Retrying(String),
}

pub struct FollowUpProcessor {
    store: Arc<dyn Store>,
    scheduler: Arc<FollowUpScheduler>,
    messenger: Arc<dyn Messenger>,
    llm: Option<Arc<dyn ChatCompletion>>,
    batch_size: i64,
    cooldown: Duration,
}

impl FollowUpProcessor {
    pub fn new(
        scheduler: Arc<FollowUpScheduler>,
        messenger: Arc<dyn Messenger>,
        llm: Option<Arc<dyn ChatCompletion>>,
        config: &AppConfig,
    ) -> Self {
        Self {
            store: scheduler.store().clone(),
            scheduler,
            messenger,
            llm,
            batch_size: config.follow_up_batch_size,
            cooldown: Duration::hours(config.cooldown_hours),
        }
    }

    /// Work through the pending entries due at `now`, oldest first. One bad
    /// entry never stops the batch.
    pub async fn process_due(&self, now: DateTime<Utc>) -> anyhow::Result<ProcessSummary> {
        let due = self.store.due_follow_ups(now, self.batch_size).await?;
        let mut summary = ProcessSummary::default();

        for follow_up in due {
            summary.processed += 1;
            let id = follow_up.id;

            match self.process_one(follow_up, now).await {
                Ok(Outcome::Sent { message_id, tagged }) => {
                    tracing::info!("Follow-up {} sent as {} (tagged: {})", id, message_id, tagged);
                    summary.sent += 1;
                }
                Ok(Outcome::Skipped(reason)) => {
                    tracing::info!("Follow-up {} skipped: {}", id, reason);
                    summary.skipped += 1;
                }
                Ok(Outcome::Rescheduled(at)) => {
                    tracing::debug!("Follow-up {} deferred to {}", id, at);
                    summary.rescheduled += 1;
                }
                Ok(Outcome::Failed(reason)) => {
                    tracing::warn!("Follow-up {} failed: {}", id, reason);
                    summary.failed += 1;
                    summary.errors.push(format!("{}: {}", id, reason));
                }
                Ok(Outcome::Retrying(reason)) => {
                    tracing::warn!("Follow-up {} will be retried: {}", id, reason);
                    summary.retried += 1;
                    summary.errors.push(format!("{}: {}", id, reason));
                }
                Err(e) => {
                    tracing::error!("Error processing follow-up {}: {:#}", id, e);
                    summary.failed += 1;
                    summary.errors.push(format!("{}: {}", id, e));
                }
            }
        }

        if summary.processed > 0 {
            tracing::info!(
                "Processed {} follow-ups: sent={} skipped={} rescheduled={} failed={} retried={}",
                summary.processed,
                summary.sent,
                summary.skipped,
                summary.rescheduled,
                summary.failed,
                summary.retried
            );
        }
        Ok(summary)
    }

    async fn process_one(&self, follow_up: FollowUp, now: DateTime<Utc>) -> anyhow::Result<Outcome> {
        let Some(conv) = self.store.get_conversation(follow_up.conversation_id).await? else {
            return self.fail_permanently(follow_up.id, "conversation not found").await;
        };
        let access_token = match self.store.get_page(&follow_up.page_id).await? {
            None => return self.fail_permanently(follow_up.id, "page not found").await,
            Some(page) => match page.access_token.filter(|t| !t.is_empty()) {
                Some(token) => token,
                None => {
                    return self
                        .fail_permanently(follow_up.id, "page has no access token")
                        .await
                }
            },
        };

        match safety::evaluate(&conv, now) {
            SafetyStatus::Permitted => {}
            SafetyStatus::Blocked { reason, until } => {
                if let (safety::BlockReason::Cooldown, Some(until)) = (reason, until) {
                    self.scheduler.reschedule(follow_up.id, until).await?;
                    return Ok(Outcome::Rescheduled(until));
                }
                self.scheduler
                    .mark_skipped(follow_up.id, reason.as_str())
                    .await?;
                return Ok(Outcome::Skipped(reason.as_str()));
            }
        }

        let goal = match follow_up.goal_id {
            Some(goal_id) => self.store.get_goal(goal_id).await?,
            None => self.store.active_goal(conv.id).await?,
        };

        let text = match follow_up.message_template.as_deref() {
            Some(template) => template.to_string(),
            None => {
                match compose::compose(
                    follow_up.follow_up_type,
                    &conv,
                    goal.as_ref(),
                    self.llm.as_deref(),
                )
                .await
                {
                    Ok(generated) => generated.text,
                    Err(fallback) => {
                        tracing::debug!(
                            "Using static template for {}: {}",
                            follow_up.id,
                            fallback.reason
                        );
                        fallback.text
                    }
                }
            }
        };

        let request = SendRequest::new(&conv.page_id, &access_token, &conv.participant_id, &text);
        match send_within_policy(self.messenger.as_ref(), request, conv.last_message_time, now).await {
            Ok(sent) => {
                self.scheduler
                    .mark_sent(follow_up.id, &sent.message_id, now)
                    .await?;
                self.store
                    .set_cooldown(conv.id, Some(now + self.cooldown))
                    .await?;
                self.store
                    .save_message(conv.id, Direction::Outbound, &text, Some(&sent.message_id))
                    .await?;
                self.log(
                    conv.id,
                    "follow_up_sent",
                    serde_json::json!({
                        "follow_up_id": follow_up.id,
                        "type": follow_up.follow_up_type.as_str(),
                        "message_id": sent.message_id,
                        "tagged": sent.tagged,
                    }),
                )
                .await?;
                Ok(Outcome::Sent {
                    message_id: sent.message_id,
                    tagged: sent.tagged,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                let updated = self.scheduler.mark_failed(follow_up.id, &reason, now).await?;
                self.log(
                    conv.id,
                    "follow_up_send_failed",
                    serde_json::json!({
                        "follow_up_id": follow_up.id,
                        "error": reason,
                        "retry_count": updated.retry_count,
                    }),
                )
                .await?;
                if updated.status.is_terminal() {
                    Ok(Outcome::Failed(reason))
                } else {
                    Ok(Outcome::Retrying(reason))
                }
            }
        }
    }

    async fn fail_permanently(&self, id: Uuid, reason: &str) -> anyhow::Result<Outcome> {
        self.scheduler.mark_failed_permanently(id, reason).await?;
        Ok(Outcome::Failed(reason.to_string()))
    }

    async fn log(
        &self,
        conversation_id: Uuid,
        action: &str,
        details: serde_json::Value,
    ) -> anyhow::Result<()> {
        self.store
            .log_action(Some(conversation_id), action, details)
            .await
    }
}
