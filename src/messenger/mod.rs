//! Outbound Messenger sends and the 24-hour standard messaging window.

pub mod graph;
pub mod payload;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

pub use graph::GraphClient;

/// Outside this window after the contact's last message, sends need a tag.
pub const STANDARD_WINDOW_HOURS: i64 = 24;
pub const ACCOUNT_UPDATE_TAG: &str = "ACCOUNT_UPDATE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessagingType {
    Response,
    MessageTag,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendRequest {
    pub page_id: String,
    pub access_token: String,
    pub recipient_id: String,
    pub text: String,
    pub messaging_type: MessagingType,
    pub tag: Option<String>,
}

impl SendRequest {
    pub fn new(page_id: &str, access_token: &str, recipient_id: &str, text: &str) -> Self {
        Self {
            page_id: page_id.to_string(),
            access_token: access_token.to_string(),
            recipient_id: recipient_id.to_string(),
            text: text.to_string(),
            messaging_type: MessagingType::Response,
            tag: None,
        }
    }

    pub fn tagged(mut self) -> Self {
        self.messaging_type = MessagingType::MessageTag;
        self.tag = Some(ACCOUNT_UPDATE_TAG.to_string());
        self
    }

    pub fn is_tagged(&self) -> bool {
        self.messaging_type == MessagingType::MessageTag
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The platform refused the send because the standard window has closed.
    #[error("outside the 24h messaging window: {0}")]
    OutsideWindow(String),
    #[error("graph api error ({status}, code {code:?}): {message}")]
    Api {
        status: u16,
        code: Option<i64>,
        message: String,
    },
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for SendError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send a text message, returning the platform message id.
    async fn send_text(&self, request: &SendRequest) -> Result<String, SendError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub message_id: String,
    pub tagged: bool,
}

/// Whether a send at `now` falls outside the standard window. An unknown
/// last-message time counts as outside.
pub fn needs_tag(last_message_time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match last_message_time {
        Some(at) => now - at > Duration::hours(STANDARD_WINDOW_HOURS),
        None => true,
    }
}

/// Send `request`, tagging it when the window has closed. An untagged send
/// rejected for the window is retried once with the tag.
pub async fn send_within_policy(
    messenger: &dyn Messenger,
    request: SendRequest,
    last_message_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Sent, SendError> {
    let request = if needs_tag(last_message_time, now) {
        request.tagged()
    } else {
        request
    };

    let outcome = messenger.send_text(&request).await;
    match outcome {
        Ok(message_id) => Ok(Sent {
            message_id,
            tagged: request.is_tagged(),
        }),
        Err(SendError::OutsideWindow(reason)) if !request.is_tagged() => {
            tracing::info!(
                "Untagged send to {} rejected ({}); retrying with {}",
                request.recipient_id,
                reason,
                ACCOUNT_UPDATE_TAG
            );
            let retry = request.tagged();
            let message_id = messenger.send_text(&retry).await?;
            Ok(Sent {
                message_id,
                tagged: true,
            })
        }
        Err(e) => Err(e),
    }
}
