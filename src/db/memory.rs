//! In-memory `Store` used by unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::{
    ActionLogEntry, Conversation, Direction, EngagementRecord, FollowUp, FollowUpStatus, Goal,
    GoalStatus, GoalType, Message, NewEngagement, NewFollowUp, Page,
};
use super::Store;

#[derive(Default)]
struct Inner {
    pages: HashMap<String, Page>,
    conversations: HashMap<Uuid, Conversation>,
    messages: Vec<Message>,
    follow_ups: Vec<FollowUp>,
    engagement: Vec<EngagementRecord>,
    goals: Vec<Goal>,
    actions: Vec<ActionLogEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_page(&self, page_id: &str, access_token: Option<&str>) {
        let mut inner = self.inner.lock().unwrap();
        inner.pages.insert(
            page_id.to_string(),
            Page {
                page_id: page_id.to_string(),
                name: format!("Page {}", page_id),
                access_token: access_token.map(str::to_string),
                created_at: Utc::now(),
            },
        );
    }

    /// Insert a conversation with default flags and let the caller tweak it.
    pub fn add_conversation(
        &self,
        page_id: &str,
        participant_id: &str,
        edit: impl FnOnce(&mut Conversation),
    ) -> Uuid {
        let now = Utc::now();
        let mut conv = Conversation {
            id: Uuid::new_v4(),
            page_id: page_id.to_string(),
            participant_id: participant_id.to_string(),
            participant_name: None,
            ai_enabled: true,
            human_takeover: false,
            takeover_until: None,
            opt_out: false,
            cooldown_until: None,
            last_message_time: Some(now),
            created_at: now,
            updated_at: now,
        };
        edit(&mut conv);
        let id = conv.id;
        self.inner.lock().unwrap().conversations.insert(id, conv);
        id
    }

    pub fn conversation(&self, id: Uuid) -> Conversation {
        self.inner.lock().unwrap().conversations[&id].clone()
    }

    pub fn follow_ups(&self) -> Vec<FollowUp> {
        self.inner.lock().unwrap().follow_ups.clone()
    }

    pub fn follow_up(&self, id: Uuid) -> FollowUp {
        self.inner
            .lock()
            .unwrap()
            .follow_ups
            .iter()
            .find(|f| f.id == id)
            .cloned()
            .unwrap()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.lock().unwrap().messages.clone()
    }

    pub fn actions(&self) -> Vec<ActionLogEntry> {
        self.inner.lock().unwrap().actions.clone()
    }

    pub fn engagement(&self) -> Vec<EngagementRecord> {
        self.inner.lock().unwrap().engagement.clone()
    }

    /// Append an engagement record with an explicit timestamp.
    pub fn add_engagement(
        &self,
        conversation_id: Uuid,
        day_of_week: i32,
        hour_of_day: i32,
        latency: Option<i64>,
        score: f64,
        created_at: DateTime<Utc>,
    ) {
        self.inner.lock().unwrap().engagement.push(EngagementRecord {
            id: Uuid::new_v4(),
            conversation_id,
            day_of_week,
            hour_of_day,
            response_latency_seconds: latency,
            engagement_score: score,
            created_at,
        });
    }

    fn with_conversation(
        &self,
        id: Uuid,
        edit: impl FnOnce(&mut Conversation),
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(conv) = inner.conversations.get_mut(&id) {
            edit(conv);
            conv.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_page(&self, page_id: &str) -> anyhow::Result<Option<Page>> {
        Ok(self.inner.lock().unwrap().pages.get(page_id).cloned())
    }

    async fn upsert_page(
        &self,
        page_id: &str,
        name: &str,
        access_token: Option<&str>,
    ) -> anyhow::Result<Page> {
        let mut inner = self.inner.lock().unwrap();
        let page = inner.pages.entry(page_id.to_string()).or_insert_with(|| Page {
            page_id: page_id.to_string(),
            name: name.to_string(),
            access_token: None,
            created_at: Utc::now(),
        });
        page.name = name.to_string();
        if let Some(token) = access_token {
            page.access_token = Some(token.to_string());
        }
        Ok(page.clone())
    }

    async fn get_conversation(&self, id: Uuid) -> anyhow::Result<Option<Conversation>> {
        Ok(self.inner.lock().unwrap().conversations.get(&id).cloned())
    }

    async fn upsert_conversation(
        &self,
        page_id: &str,
        participant_id: &str,
    ) -> anyhow::Result<Conversation> {
        let existing = self
            .inner
            .lock()
            .unwrap()
            .conversations
            .values()
            .find(|c| c.page_id == page_id && c.participant_id == participant_id)
            .cloned();
        if let Some(conv) = existing {
            return Ok(conv);
        }
        let id = self.add_conversation(page_id, participant_id, |c| c.last_message_time = None);
        Ok(self.conversation(id))
    }

    async fn set_last_message_time(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()> {
        self.with_conversation(id, |c| c.last_message_time = Some(at))
    }

    async fn set_cooldown(&self, id: Uuid, until: Option<DateTime<Utc>>) -> anyhow::Result<()> {
        self.with_conversation(id, |c| c.cooldown_until = until)
    }

    async fn set_human_takeover(
        &self,
        id: Uuid,
        enabled: bool,
        until: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        self.with_conversation(id, |c| {
            c.human_takeover = enabled;
            c.takeover_until = until;
        })
    }

    async fn set_ai_enabled(&self, id: Uuid, enabled: bool) -> anyhow::Result<()> {
        self.with_conversation(id, |c| c.ai_enabled = enabled)
    }

    async fn set_opt_out(&self, id: Uuid, opt_out: bool) -> anyhow::Result<()> {
        self.with_conversation(id, |c| c.opt_out = opt_out)
    }

    async fn save_message(
        &self,
        conversation_id: Uuid,
        direction: Direction,
        text: &str,
        mid: Option<&str>,
    ) -> anyhow::Result<()> {
        self.inner.lock().unwrap().messages.push(Message {
            id: Uuid::new_v4(),
            conversation_id,
            direction,
            text: text.to_string(),
            mid: mid.map(str::to_string),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn last_outbound_at(
        &self,
        conversation_id: Uuid,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id && m.direction == Direction::Outbound)
            .map(|m| m.created_at)
            .max())
    }

    async fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
    ) -> anyhow::Result<Vec<Message>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .messages
            .iter()
            .rev()
            .filter(|m| m.conversation_id == conversation_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn insert_follow_up(&self, new: &NewFollowUp) -> anyhow::Result<FollowUp> {
        let now = Utc::now();
        let follow_up = FollowUp {
            id: Uuid::new_v4(),
            conversation_id: new.conversation_id,
            page_id: new.page_id.clone(),
            goal_id: new.goal_id,
            follow_up_type: new.follow_up_type,
            scheduled_at: new.scheduled_at,
            status: FollowUpStatus::Pending,
            retry_count: 0,
            max_retries: new.max_retries,
            message_template: new.message_template.clone(),
            sent_message_id: None,
            error_message: None,
            sent_at: None,
            created_at: now,
            updated_at: now,
        };
        self.inner.lock().unwrap().follow_ups.push(follow_up.clone());
        Ok(follow_up)
    }

    async fn get_follow_up(&self, id: Uuid) -> anyhow::Result<Option<FollowUp>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .follow_ups
            .iter()
            .find(|f| f.id == id)
            .cloned())
    }

    async fn update_follow_up(&self, follow_up: &FollowUp) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(row) = inner.follow_ups.iter_mut().find(|f| f.id == follow_up.id) {
            *row = follow_up.clone();
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn cancel_pending_follow_ups(
        &self,
        conversation_id: Uuid,
        reason: &str,
    ) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut count = 0;
        for row in inner.follow_ups.iter_mut().filter(|f| {
            f.conversation_id == conversation_id && f.status == FollowUpStatus::Pending
        }) {
            row.status = FollowUpStatus::Cancelled;
            row.error_message = Some(reason.to_string());
            row.updated_at = Utc::now();
            count += 1;
        }
        Ok(count)
    }

    async fn due_follow_ups(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<FollowUp>> {
        let mut due: Vec<FollowUp> = self
            .inner
            .lock()
            .unwrap()
            .follow_ups
            .iter()
            .filter(|f| f.status == FollowUpStatus::Pending && f.scheduled_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|f| f.scheduled_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn list_follow_ups(&self, conversation_id: Uuid) -> anyhow::Result<Vec<FollowUp>> {
        let mut rows: Vec<FollowUp> = self
            .inner
            .lock()
            .unwrap()
            .follow_ups
            .iter()
            .filter(|f| f.conversation_id == conversation_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at));
        Ok(rows)
    }

    async fn follow_ups_by_status(
        &self,
        status: FollowUpStatus,
        limit: i64,
    ) -> anyhow::Result<Vec<FollowUp>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .follow_ups
            .iter()
            .filter(|f| f.status == status)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn delete_terminal_follow_ups(&self, before: DateTime<Utc>) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let len = inner.follow_ups.len();
        inner
            .follow_ups
            .retain(|f| !(f.status.is_terminal() && f.updated_at < before));
        Ok((len - inner.follow_ups.len()) as u64)
    }

    async fn insert_engagement(&self, record: &NewEngagement) -> anyhow::Result<()> {
        self.add_engagement(
            record.conversation_id,
            record.day_of_week,
            record.hour_of_day,
            record.response_latency_seconds,
            record.engagement_score,
            Utc::now(),
        );
        Ok(())
    }

    async fn recent_engagement(
        &self,
        conversation_id: Uuid,
        limit: i64,
    ) -> anyhow::Result<Vec<EngagementRecord>> {
        let mut rows: Vec<EngagementRecord> = self
            .inner
            .lock()
            .unwrap()
            .engagement
            .iter()
            .filter(|r| r.conversation_id == conversation_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order among equal timestamps.
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn active_goal(&self, conversation_id: Uuid) -> anyhow::Result<Option<Goal>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .goals
            .iter()
            .find(|g| g.conversation_id == conversation_id && g.status == GoalStatus::Active)
            .cloned())
    }

    async fn get_goal(&self, id: Uuid) -> anyhow::Result<Option<Goal>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .goals
            .iter()
            .find(|g| g.id == id)
            .cloned())
    }

    async fn replace_active_goal(
        &self,
        conversation_id: Uuid,
        goal_type: GoalType,
        goal_prompt: &str,
    ) -> anyhow::Result<Goal> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        for g in inner
            .goals
            .iter_mut()
            .filter(|g| g.conversation_id == conversation_id && g.status == GoalStatus::Active)
        {
            g.status = GoalStatus::Abandoned;
            g.updated_at = now;
        }
        let goal = Goal {
            id: Uuid::new_v4(),
            conversation_id,
            goal_type,
            goal_prompt: goal_prompt.to_string(),
            progress_score: 0.0,
            status: GoalStatus::Active,
            created_at: now,
            updated_at: now,
        };
        inner.goals.push(goal.clone());
        Ok(goal)
    }

    async fn update_goal(&self, goal: &Goal) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(row) = inner.goals.iter_mut().find(|g| g.id == goal.id) {
            *row = goal.clone();
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn log_action(
        &self,
        conversation_id: Option<Uuid>,
        action: &str,
        details: serde_json::Value,
    ) -> anyhow::Result<()> {
        self.inner.lock().unwrap().actions.push(ActionLogEntry {
            id: Uuid::new_v4(),
            conversation_id,
            action: action.to_string(),
            details,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn recent_actions(
        &self,
        conversation_id: Option<Uuid>,
        limit: i64,
    ) -> anyhow::Result<Vec<ActionLogEntry>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .actions
            .iter()
            .rev()
            .filter(|a| conversation_id.map_or(true, |id| a.conversation_id == Some(id)))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
