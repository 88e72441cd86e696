use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::{
    ActionLogEntry, Conversation, Direction, EngagementRecord, FollowUp, FollowUpStatus, Goal,
    GoalType, Message, NewEngagement, NewFollowUp, Page,
};

/// Data access used by the follow-up engine. Every component receives one of
/// these explicitly; there is no global client.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Pages & conversations ──────────────────────────────────────

    async fn get_page(&self, page_id: &str) -> anyhow::Result<Option<Page>>;

    /// Register a page. A `None` token keeps the stored one.
    async fn upsert_page(
        &self,
        page_id: &str,
        name: &str,
        access_token: Option<&str>,
    ) -> anyhow::Result<Page>;

    async fn get_conversation(&self, id: Uuid) -> anyhow::Result<Option<Conversation>>;

    /// Find the conversation for a (page, participant) pair, creating it on
    /// first contact.
    async fn upsert_conversation(
        &self,
        page_id: &str,
        participant_id: &str,
    ) -> anyhow::Result<Conversation>;

    async fn set_last_message_time(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()>;

    async fn set_cooldown(&self, id: Uuid, until: Option<DateTime<Utc>>) -> anyhow::Result<()>;

    async fn set_human_takeover(
        &self,
        id: Uuid,
        enabled: bool,
        until: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()>;

    async fn set_ai_enabled(&self, id: Uuid, enabled: bool) -> anyhow::Result<()>;

    async fn set_opt_out(&self, id: Uuid, opt_out: bool) -> anyhow::Result<()>;

    // ── Messages ───────────────────────────────────────────────────

    async fn save_message(
        &self,
        conversation_id: Uuid,
        direction: Direction,
        text: &str,
        mid: Option<&str>,
    ) -> anyhow::Result<()>;

    async fn last_outbound_at(&self, conversation_id: Uuid)
        -> anyhow::Result<Option<DateTime<Utc>>>;

    /// Most recent messages first.
    async fn recent_messages(&self, conversation_id: Uuid, limit: i64)
        -> anyhow::Result<Vec<Message>>;

    // ── Follow-ups ─────────────────────────────────────────────────

    async fn insert_follow_up(&self, new: &NewFollowUp) -> anyhow::Result<FollowUp>;

    async fn get_follow_up(&self, id: Uuid) -> anyhow::Result<Option<FollowUp>>;

    /// Persist status, schedule, retry and outcome fields of an existing entry.
    async fn update_follow_up(&self, follow_up: &FollowUp) -> anyhow::Result<()>;

    /// Cancel every pending entry of a conversation, returning how many were hit.
    async fn cancel_pending_follow_ups(
        &self,
        conversation_id: Uuid,
        reason: &str,
    ) -> anyhow::Result<u64>;

    /// Pending entries with `scheduled_at <= now`, oldest first.
    async fn due_follow_ups(&self, now: DateTime<Utc>, limit: i64)
        -> anyhow::Result<Vec<FollowUp>>;

    async fn list_follow_ups(&self, conversation_id: Uuid) -> anyhow::Result<Vec<FollowUp>>;

    async fn follow_ups_by_status(
        &self,
        status: FollowUpStatus,
        limit: i64,
    ) -> anyhow::Result<Vec<FollowUp>>;

    /// Delete terminal entries last touched before `before`.
    async fn delete_terminal_follow_ups(&self, before: DateTime<Utc>) -> anyhow::Result<u64>;

    // ── Engagement ─────────────────────────────────────────────────

    async fn insert_engagement(&self, record: &NewEngagement) -> anyhow::Result<()>;

    /// Most recent records first.
    async fn recent_engagement(
        &self,
        conversation_id: Uuid,
        limit: i64,
    ) -> anyhow::Result<Vec<EngagementRecord>>;

    // ── Goals ──────────────────────────────────────────────────────

    async fn active_goal(&self, conversation_id: Uuid) -> anyhow::Result<Option<Goal>>;

    async fn get_goal(&self, id: Uuid) -> anyhow::Result<Option<Goal>>;

    /// Abandon the current active goal (if any) and insert a new active one.
    async fn replace_active_goal(
        &self,
        conversation_id: Uuid,
        goal_type: GoalType,
        goal_prompt: &str,
    ) -> anyhow::Result<Goal>;

    async fn update_goal(&self, goal: &Goal) -> anyhow::Result<()>;

    // ── Audit ──────────────────────────────────────────────────────

    async fn log_action(
        &self,
        conversation_id: Option<Uuid>,
        action: &str,
        details: serde_json::Value,
    ) -> anyhow::Result<()>;

    /// Most recent entries first, optionally for one conversation only.
    async fn recent_actions(
        &self,
        conversation_id: Option<Uuid>,
        limit: i64,
    ) -> anyhow::Result<Vec<ActionLogEntry>>;
}
