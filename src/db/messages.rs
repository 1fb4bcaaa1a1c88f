use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use crate::db::models::MessageRecord;
use crate::error::AppError;
use crate::model::{ChatMessage, MessageKind};

pub struct MessageRepository;

impl MessageRepository {
    /// Append one routed message to the `messages` collection.
    pub async fn append(pool: &Pool<Sqlite>, msg: &ChatMessage) -> Result<String, AppError> {
        let id = Uuid::new_v4().to_string();

        let (content, caption, base64_data) = match &msg.kind {
            MessageKind::Text => (Some(msg.content.as_str()), None, None),
            MessageKind::Image { base64_data } => {
                (None, Some(msg.content.as_str()), Some(base64_data.as_str()))
            }
        };

        sqlx::query(
            r#"
INSERT INTO messages (id, chat_id, sender_phone, sender_name, timestamp, type, content, caption, base64_data)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&msg.chat_id)
        .bind(&msg.sender.phone_number)
        .bind(&msg.sender.name)
        .bind(msg.date.timestamp_millis())
        .bind(msg.type_tag())
        .bind(content)
        .bind(caption)
        .bind(base64_data)
        .execute(pool)
        .await?;

        Ok(id)
    }

    /// Full history of a chat, oldest first.
    pub async fn history(pool: &Pool<Sqlite>, chat_id: &str) -> Result<Vec<ChatMessage>, AppError> {
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
SELECT id, chat_id, sender_phone, sender_name, timestamp, type, content, caption, base64_data
FROM messages
WHERE chat_id = ?
ORDER BY timestamp ASC, rowid ASC
            "#,
        )
        .bind(chat_id)
        .fetch_all(pool)
        .await?;

        Ok(records
            .into_iter()
            .filter_map(|record| {
                let id = record.id.clone();
                let msg = record.into_message();
                if msg.is_none() {
                    tracing::warn!(message_id = %id, "Skipping stored message with unknown type");
                }
                msg
            })
            .collect())
    }
}
