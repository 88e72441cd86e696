use std::sync::Arc;

use uuid::Uuid;

use crate::db::models::{Goal, GoalStatus, GoalType};
use crate::db::Store;

#[derive(Debug, thiserror::Error)]
pub enum GoalError {
    #[error("conversation {0} not found")]
    ConversationNotFound(Uuid),
    #[error("conversation {0} has no active goal")]
    NoActiveGoal(Uuid),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl GoalType {
    /// Prompt used when the caller doesn't supply one.
    pub fn default_prompt(&self) -> &'static str {
        match self {
            Self::QualifyLead => {
                "Find out what the contact needs, their budget and timeline, \
                 and whether they are a good fit."
            }
            Self::BookMeeting => {
                "Steer the conversation toward booking a call or appointment. \
                 Offer concrete time slots."
            }
            Self::CollectContactInfo => {
                "Politely ask for the contact's phone number or email so the team can follow up."
            }
            Self::Reengage => {
                "Re-open a conversation that has gone quiet. Be brief and friendly, no pressure."
            }
            Self::Custom => "Help the contact with whatever they need.",
        }
    }
}

/// One active objective per conversation, read by the follow-up composer.
pub struct GoalController {
    store: Arc<dyn Store>,
}

impl GoalController {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Replace whatever goal is active. Last write wins.
    pub async fn set_goal(
        &self,
        conversation_id: Uuid,
        goal_type: GoalType,
        goal_prompt: Option<&str>,
    ) -> Result<Goal, GoalError> {
        if self.store.get_conversation(conversation_id).await?.is_none() {
            return Err(GoalError::ConversationNotFound(conversation_id));
        }

        let prompt = goal_prompt
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| goal_type.default_prompt());

        let goal = self
            .store
            .replace_active_goal(conversation_id, goal_type, prompt)
            .await?;

        self.store
            .log_action(
                Some(conversation_id),
                "goal_set",
                serde_json::json!({ "goal_id": goal.id, "goal_type": goal_type.as_str() }),
            )
            .await?;

        tracing::info!("Goal {} ({}) set for conv {}", goal.id, goal_type, conversation_id);
        Ok(goal)
    }

    pub async fn get_active_goal(&self, conversation_id: Uuid) -> Result<Option<Goal>, GoalError> {
        Ok(self.store.active_goal(conversation_id).await?)
    }

    pub async fn abandon_goal(&self, conversation_id: Uuid) -> Result<Goal, GoalError> {
        let mut goal = self
            .store
            .active_goal(conversation_id)
            .await?
            .ok_or(GoalError::NoActiveGoal(conversation_id))?;

        goal.status = GoalStatus::Abandoned;
        self.store.update_goal(&goal).await?;
        self.store
            .log_action(
                Some(conversation_id),
                "goal_abandoned",
                serde_json::json!({ "goal_id": goal.id }),
            )
            .await?;
        Ok(goal)
    }

    /// Record progress (clamped to 0..=1). A full score completes the goal.
    pub async fn record_progress(
        &self,
        conversation_id: Uuid,
        score: f64,
    ) -> Result<Goal, GoalError> {
        let mut goal = self
            .store
            .active_goal(conversation_id)
            .await?
            .ok_or(GoalError::NoActiveGoal(conversation_id))?;

        goal.progress_score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        if goal.progress_score >= 1.0 {
            goal.status = GoalStatus::Completed;
            tracing::info!("Goal {} completed for conv {}", goal.id, conversation_id);
        }
        self.store.update_goal(&goal).await?;
        Ok(goal)
    }
}
