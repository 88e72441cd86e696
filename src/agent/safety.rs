use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::models::Conversation;

/// Why the automated agent may not message a conversation right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    OptOut,
    AiDisabled,
    HumanTakeover,
    Cooldown,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OptOut => "opt_out",
            Self::AiDisabled => "ai_disabled",
            Self::HumanTakeover => "human_takeover",
            Self::Cooldown => "cooldown",
        }
    }

    /// Terminal blocks never lapse on their own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::OptOut | Self::AiDisabled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SafetyStatus {
    Permitted,
    Blocked {
        reason: BlockReason,
        /// When the block lapses by itself; `None` for terminal blocks and
        /// open-ended takeovers.
        until: Option<DateTime<Utc>>,
    },
}

impl SafetyStatus {
    pub fn is_permitted(&self) -> bool {
        matches!(self, Self::Permitted)
    }

    pub fn reason(&self) -> Option<BlockReason> {
        match self {
            Self::Permitted => None,
            Self::Blocked { reason, .. } => Some(*reason),
        }
    }
}

/// Decide whether automated messaging is allowed for `conv` at `now`.
/// First matching rule wins.
pub fn evaluate(conv: &Conversation, now: DateTime<Utc>) -> SafetyStatus {
    if conv.opt_out {
        return SafetyStatus::Blocked {
            reason: BlockReason::OptOut,
            until: None,
        };
    }

    if !conv.ai_enabled {
        return SafetyStatus::Blocked {
            reason: BlockReason::AiDisabled,
            until: None,
        };
    }

    if conv.human_takeover {
        match conv.takeover_until {
            None => {
                return SafetyStatus::Blocked {
                    reason: BlockReason::HumanTakeover,
                    until: None,
                }
            }
            Some(until) if until > now => {
                return SafetyStatus::Blocked {
                    reason: BlockReason::HumanTakeover,
                    until: Some(until),
                }
            }
            Some(_) => {}
        }
    }

    if let Some(until) = conv.cooldown_until {
        if until > now {
            return SafetyStatus::Blocked {
                reason: BlockReason::Cooldown,
                until: Some(until),
            };
        }
    }

    SafetyStatus::Permitted
}
