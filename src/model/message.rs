use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::user::User;

pub const SYSTEM_CHAT_ID: &str = "SYSTEM";
pub const SYSTEM_NOTICE_CHAT_ID: &str = "SYSTEM_NOTIF";
pub const JOINED: &str = "JOINED";
pub const LEFT: &str = "LEFT";

/// Variant-specific part of a chat message, tagged by `type` on the wire and
/// in the `messages` collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Text,
    Image {
        #[serde(rename = "base64Data")]
        base64_data: String,
    },
}

impl MessageKind {
    pub fn tag(&self) -> &'static str {
        match self {
            MessageKind::Text => "TEXT",
            MessageKind::Image { .. } => "IMAGE",
        }
    }
}

/// A chat payload. `content` is the text body, or the caption for images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub chat_id: String,
    pub sender: User,
    pub content: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub date: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: MessageKind,
}

impl ChatMessage {
    pub fn text(chat_id: impl Into<String>, sender: User, content: impl Into<String>) -> Self {
        ChatMessage {
            chat_id: chat_id.into(),
            sender,
            content: content.into(),
            date: now_millis(),
            kind: MessageKind::Text,
        }
    }

    pub fn image(
        chat_id: impl Into<String>,
        sender: User,
        caption: impl Into<String>,
        base64_data: impl Into<String>,
    ) -> Self {
        ChatMessage {
            chat_id: chat_id.into(),
            sender,
            content: caption.into(),
            date: now_millis(),
            kind: MessageKind::Image {
                base64_data: base64_data.into(),
            },
        }
    }

    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = date;
        self
    }

    pub fn type_tag(&self) -> &'static str {
        self.kind.tag()
    }
}

/// Timestamps carry millisecond precision so they survive storage unchanged.
fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
