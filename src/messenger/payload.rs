//! Messenger webhook payloads.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<Entry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Entry {
    /// Page id
    pub id: String,
    #[serde(default)]
    pub messaging: Vec<Messaging>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Party {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Messaging {
    pub sender: Party,
    pub recipient: Party,
    /// Milliseconds since the epoch
    #[serde(default)]
    pub timestamp: Option<i64>,
    pub message: Option<MessageBody>,
    pub postback: Option<Postback>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageBody {
    pub mid: Option<String>,
    pub text: Option<String>,
    #[serde(default)]
    pub is_echo: bool,
    /// Set on echoes of messages sent through an app (our own sends).
    pub app_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Postback {
    pub title: Option<String>,
    pub payload: Option<String>,
}

/// What a single `messaging` item means for us.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The contact wrote to the page.
    Inbound {
        page_id: String,
        participant_id: String,
        text: String,
        mid: Option<String>,
        at: DateTime<Utc>,
    },
    /// A person replied from the page inbox (echo without an app id).
    HumanReply {
        page_id: String,
        participant_id: String,
        text: String,
        mid: Option<String>,
    },
}

impl WebhookPayload {
    pub fn is_page(&self) -> bool {
        self.object == "page"
    }

    /// Flatten entries into events we act on. Echoes of app sends, reads and
    /// deliveries are dropped.
    pub fn events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        for entry in &self.entry {
            for item in &entry.messaging {
                let at = item
                    .timestamp
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                    .unwrap_or_else(Utc::now);

                if let Some(message) = &item.message {
                    let text = message.text.clone().unwrap_or_default();
                    if message.is_echo {
                        if message.app_id.is_none() {
                            events.push(Event::HumanReply {
                                page_id: entry.id.clone(),
                                participant_id: item.recipient.id.clone(),
                                text,
                                mid: message.mid.clone(),
                            });
                        }
                    } else {
                        events.push(Event::Inbound {
                            page_id: entry.id.clone(),
                            participant_id: item.sender.id.clone(),
                            text,
                            mid: message.mid.clone(),
                            at,
                        });
                    }
                } else if let Some(postback) = &item.postback {
                    let text = postback
                        .title
                        .clone()
                        .or_else(|| postback.payload.clone())
                        .unwrap_or_default();
                    events.push(Event::Inbound {
                        page_id: entry.id.clone(),
                        participant_id: item.sender.id.clone(),
                        text,
                        mid: None,
                        at,
                    });
                }
            }
        }
        events
    }
}
