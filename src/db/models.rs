use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Raised when a text column holds a value none of our enums know about.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Generates `as_str`, `Display`, `FromStr` and `TryFrom<String>` for an enum
/// stored as snake_case text.
macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = UnknownVariant;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Page {
    pub page_id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub page_id: String,
    pub participant_id: String,
    pub participant_name: Option<String>,
    pub ai_enabled: bool,
    pub human_takeover: bool,
    pub takeover_until: Option<DateTime<Utc>>,
    pub opt_out: bool,
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Time of the contact's most recent inbound message.
    pub last_message_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

text_enum!(Direction, "message direction", {
    Inbound => "inbound",
    Outbound => "outbound",
});

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    #[sqlx(try_from = "String")]
    pub direction: Direction,
    pub text: String,
    pub mid: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpType {
    Initial,
    Second,
    Reengagement,
    Manual,
    Reminder,
    Flow,
    BestTime,
    Intuition,
}

text_enum!(FollowUpType, "follow-up type", {
    Initial => "initial",
    Second => "second",
    Reengagement => "reengagement",
    Manual => "manual",
    Reminder => "reminder",
    Flow => "flow",
    BestTime => "best_time",
    Intuition => "intuition",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpStatus {
    Pending,
    Sent,
    Skipped,
    Failed,
    Cancelled,
}

text_enum!(FollowUpStatus, "follow-up status", {
    Pending => "pending",
    Sent => "sent",
    Skipped => "skipped",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl FollowUpStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FollowUp {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub page_id: String,
    pub goal_id: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub follow_up_type: FollowUpType,
    pub scheduled_at: DateTime<Utc>,
    #[sqlx(try_from = "String")]
    pub status: FollowUpStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub message_template: Option<String>,
    pub sent_message_id: Option<String>,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a follow-up; the store fills in id, status and timestamps.
#[derive(Debug, Clone)]
pub struct NewFollowUp {
    pub conversation_id: Uuid,
    pub page_id: String,
    pub goal_id: Option<Uuid>,
    pub follow_up_type: FollowUpType,
    pub scheduled_at: DateTime<Utc>,
    pub max_retries: i32,
    pub message_template: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EngagementRecord {
    pub id: Uuid,
    pub conversation_id: Uuid,
    /// 0 = Sunday .. 6 = Saturday, UTC.
    pub day_of_week: i32,
    pub hour_of_day: i32,
    pub response_latency_seconds: Option<i64>,
    pub engagement_score: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEngagement {
    pub conversation_id: Uuid,
    pub day_of_week: i32,
    pub hour_of_day: i32,
    pub response_latency_seconds: Option<i64>,
    pub engagement_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    QualifyLead,
    BookMeeting,
    CollectContactInfo,
    Reengage,
    Custom,
}

text_enum!(GoalType, "goal type", {
    QualifyLead => "qualify_lead",
    BookMeeting => "book_meeting",
    CollectContactInfo => "collect_contact_info",
    Reengage => "reengage",
    Custom => "custom",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Active,
    Completed,
    Abandoned,
}

text_enum!(GoalStatus, "goal status", {
    Active => "active",
    Completed => "completed",
    Abandoned => "abandoned",
});

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Goal {
    pub id: Uuid,
    pub conversation_id: Uuid,
    #[sqlx(try_from = "String")]
    pub goal_type: GoalType,
    pub goal_prompt: String,
    pub progress_score: f64,
    #[sqlx(try_from = "String")]
    pub status: GoalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub action: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
