//! Follow-up message text: static templates per follow-up type, optionally
//! rewritten by the LLM.

use crate::ai::llm::{ChatCompletion, ChatMessage};
use crate::db::models::{Conversation, FollowUpType, Goal};

/// Text produced by the LLM.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub text: String,
}

/// Static template used instead, with the reason the LLM was not used.
#[derive(Debug, Clone, PartialEq)]
pub struct Fallback {
    pub text: String,
    pub reason: String,
}

impl Fallback {
    fn new(text: String, reason: impl Into<String>) -> Self {
        Self {
            text,
            reason: reason.into(),
        }
    }
}

/// Cap on generated text (Messenger allows 2000 chars).
const MAX_MESSAGE_CHARS: usize = 640;

pub fn template(follow_up_type: FollowUpType, name: Option<&str>) -> String {
    let greeting = match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(n) => format!("Hi {}!", n),
        None => "Hi there!".to_string(),
    };

    let body = match follow_up_type {
        FollowUpType::Initial => "Just checking in to see if you had any questions. We're happy to help!",
        FollowUpType::Second => "Following up on our last conversation. Is there anything else you'd like to know?",
        FollowUpType::Reengagement => "It's been a while! We'd love to hear from you again. Anything we can help with today?",
        FollowUpType::Manual => "We wanted to reach out personally. Let us know if there's anything you need.",
        FollowUpType::Reminder => "Friendly reminder about your upcoming appointment with us. Reply here if you need to reschedule.",
        FollowUpType::Flow => "Here's the next step we mentioned. Reply whenever you're ready to continue.",
        FollowUpType::BestTime => "Hope your day is going well! Do you have a minute to pick up where we left off?",
        FollowUpType::Intuition => "We thought of you and wanted to check in. How are things going?",
    };

    format!("{} {}", greeting, body)
}

fn rewrite_prompt(follow_up_type: FollowUpType, goal: Option<&Goal>) -> String {
    let mut prompt = String::with_capacity(512);
    prompt.push_str(
        "You write short, friendly Facebook Messenger follow-up messages for a small business. \
         Rewrite the draft so it sounds natural and personal. Keep it under 3 sentences, \
         plain text, at most one emoji, no placeholders. Reply with the message only.\n",
    );
    prompt.push_str(&format!("Follow-up type: {}\n", follow_up_type));
    if let Some(goal) = goal {
        prompt.push_str(&format!(
            "Conversation objective ({}): {}\n",
            goal.goal_type, goal.goal_prompt
        ));
    }
    prompt
}

/// Compose the text for a follow-up.
///
/// `Err(Fallback)` carries a usable static message; callers send it either way.
pub async fn compose(
    follow_up_type: FollowUpType,
    conv: &Conversation,
    goal: Option<&Goal>,
    llm: Option<&dyn ChatCompletion>,
) -> Result<Generated, Fallback> {
    let draft = template(follow_up_type, conv.participant_name.as_deref());

    let Some(llm) = llm else {
        return Err(Fallback::new(draft, "llm not configured"));
    };

    let messages = [
        ChatMessage::system(rewrite_prompt(follow_up_type, goal)),
        ChatMessage::user(draft.clone()),
    ];

    match llm.chat(&messages).await {
        Ok(resp) => {
            let text = clean(&resp.text);
            if text.is_empty() {
                Err(Fallback::new(draft, "llm returned empty text"))
            } else {
                Ok(Generated { text })
            }
        }
        Err(e) => Err(Fallback::new(draft, e.to_string())),
    }
}

/// Strip wrapping quotes and whitespace and cap the length.
fn clean(text: &str) -> String {
    let trimmed = text.trim().trim_matches('"').trim();
    trimmed.chars().take(MAX_MESSAGE_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::llm::LlmResponse;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct StubLlm {
        reply: Option<String>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatCompletion for StubLlm {
        async fn chat(&self, messages: &[ChatMessage]) -> anyhow::Result<LlmResponse> {
            self.seen
                .lock()
                .unwrap()
                .extend(messages.iter().map(|m| m.content.clone()));
            match &self.reply {
                Some(text) => Ok(LlmResponse {
                    text: text.clone(),
                    usage: None,
                }),
                None => anyhow::bail!("upstream timeout"),
            }
        }
    }

    fn conversation(name: Option<&str>) -> Conversation {
        let now = Utc::now();
        Conversation {
            id: Uuid::new_v4(),
            page_id: "page".to_string(),
            participant_id: "psid".to_string(),
            participant_name: name.map(str::to_string),
            ai_enabled: true,
            human_takeover: false,
            takeover_until: None,
            opt_out: false,
            cooldown_until: None,
            last_message_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_template_uses_name() {
        let text = template(FollowUpType::Reminder, Some("Ana"));
        assert!(text.starts_with("Hi Ana!"));
        assert!(template(FollowUpType::Initial, Some("  ")).starts_with("Hi there!"));
    }

    #[tokio::test]
    async fn test_without_llm_falls_back() {
        let conv = conversation(None);
        let fallback = compose(FollowUpType::Second, &conv, None, None)
            .await
            .unwrap_err();
        assert_eq!(fallback.text, template(FollowUpType::Second, None));
    }

    #[tokio::test]
    async fn test_llm_error_falls_back_silently() {
        let conv = conversation(Some("Ben"));
        let llm = StubLlm {
            reply: None,
            seen: Mutex::new(Vec::new()),
        };
        let fallback = compose(FollowUpType::Initial, &conv, None, Some(&llm))
            .await
            .unwrap_err();
        assert!(fallback.reason.contains("upstream timeout"));
        assert!(fallback.text.starts_with("Hi Ben!"));
    }

    #[tokio::test]
    async fn test_generated_text_includes_goal_in_prompt() {
        let conv = conversation(None);
        let now = Utc::now();
        let goal = Goal {
            id: Uuid::new_v4(),
            conversation_id: conv.id,
            goal_type: crate::db::models::GoalType::BookMeeting,
            goal_prompt: "Get them on a call this week".to_string(),
            progress_score: 0.0,
            status: crate::db::models::GoalStatus::Active,
            created_at: now,
            updated_at: now,
        };
        let llm = StubLlm {
            reply: Some("  \"Hey! Free for a quick call Thursday?\"  ".to_string()),
            seen: Mutex::new(Vec::new()),
        };

        let generated = compose(FollowUpType::BestTime, &conv, Some(&goal), Some(&llm))
            .await
            .unwrap();
        assert_eq!(generated.text, "Hey! Free for a quick call Thursday?");
        assert!(llm.seen.lock().unwrap()[0].contains("Get them on a call this week"));
    }

    #[tokio::test]
    async fn test_blank_llm_reply_falls_back() {
        let conv = conversation(None);
        let llm = StubLlm {
            reply: Some("   ".to_string()),
            seen: Mutex::new(Vec::new()),
        };
        assert!(compose(FollowUpType::Flow, &conv, None, Some(&llm)).await.is_err());
    }
}
