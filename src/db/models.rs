use chrono::DateTime;
use sqlx::FromRow;

use crate::crypto::PasswordDigest;
use crate::error::AppError;
use crate::model::{ChatMessage, MessageKind, User};

#[derive(Debug, Clone, FromRow)]
pub struct UserRecord {
    pub phone_number: String,
    pub id: String,
    pub name: String,
    pub profile_image: Option<String>,
    pub password_hash: Option<Vec<u8>>,
    pub password_salt: Option<Vec<u8>>,
    pub created_at: i64,
}

impl UserRecord {
    /// Profile fields as loaded from storage.
    pub fn to_user(&self) -> User {
        User {
            user_id: Some(self.id.clone()),
            name: self.name.clone(),
            phone_number: self.phone_number.clone(),
            profile_image: self.profile_image.clone(),
        }
    }

    /// Stored credentials, if this user ever authenticated.
    pub fn digest(&self) -> Result<Option<PasswordDigest>, AppError> {
        match (&self.password_hash, &self.password_salt) {
            (Some(hash), Some(salt)) => PasswordDigest::from_parts(hash, salt).map(Some),
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct MessageRecord {
    pub id: String,
    pub chat_id: String,
    pub sender_phone: String,
    pub sender_name: String,
    pub timestamp: i64,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub content: Option<String>,
    pub caption: Option<String>,
    pub base64_data: Option<String>,
}

impl MessageRecord {
    /// Rebuild the chat message. Unknown type tags yield `None`.
    pub fn into_message(self) -> Option<ChatMessage> {
        let date = DateTime::from_timestamp_millis(self.timestamp)?;
        let sender = User::new(self.sender_name, self.sender_phone);

        let (content, kind) = match self.kind.as_str() {
            "TEXT" => (self.content.unwrap_or_default(), MessageKind::Text),
            "IMAGE" => (
                self.caption.unwrap_or_default(),
                MessageKind::Image {
                    base64_data: self.base64_data.unwrap_or_default(),
                },
            ),
            _ => return None,
        };

        Some(ChatMessage {
            chat_id: self.chat_id,
            sender,
            content,
            date,
            kind,
        })
    }
}

/// Row of the `rooms` collection. Group rows leave `kind` empty; private
/// rows carry `PRIVATE` and the two participant phones.
#[derive(Debug, Clone, FromRow)]
pub struct RoomRecord {
    pub id: String,
    #[sqlx(rename = "type")]
    pub kind: Option<String>,
    pub name: Option<String>,
    pub admin_phone: Option<String>,
    pub members: Option<String>,
    pub user1_phone: Option<String>,
    pub user2_phone: Option<String>,
}

pub const PRIVATE_ROOM_TYPE: &str = "PRIVATE";

impl RoomRecord {
    pub fn is_private(&self) -> bool {
        self.kind.as_deref() == Some(PRIVATE_ROOM_TYPE)
    }

    pub fn member_phones(&self) -> Result<Vec<String>, AppError> {
        match &self.members {
            Some(raw) => Ok(serde_json::from_str(raw)?),
            None => Ok(Vec::new()),
        }
    }
}
