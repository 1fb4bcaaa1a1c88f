use tokio::sync::RwLock;

use super::group::HISTORY_LIMIT;
use crate::model::{ChatMessage, User};

/// A 1:1 chat between two fixed participants.
#[derive(Debug)]
pub struct PrivateRoom {
    id: String,
    first: User,
    second: User,
    history: RwLock<Vec<ChatMessage>>,
}

impl PrivateRoom {
    pub fn new(id: impl Into<String>, first: User, second: User) -> Self {
        PrivateRoom {
            id: id.into(),
            first,
            second,
            history: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn first_participant(&self) -> &User {
        &self.first
    }

    pub fn second_participant(&self) -> &User {
        &self.second
    }

    pub fn is_participant(&self, user: &User) -> bool {
        self.first.same_identity(user) || self.second.same_identity(user)
    }

    /// The participant that is not `sender`, if `sender` is one of the two.
    pub fn counterpart(&self, sender: &User) -> Option<&User> {
        if self.first.same_identity(sender) {
            Some(&self.second)
        } else if self.second.same_identity(sender) {
            Some(&self.first)
        } else {
            None
        }
    }

    /// Record a message and return its single recipient. Messages from
    /// non-participants are dropped.
    pub async fn send_message(&self, msg: &ChatMessage) -> Vec<User> {
        let Some(recipient) = self.counterpart(&msg.sender) else {
            tracing::warn!(
                room_id = %self.id,
                sender = %msg.sender.phone_number,
                "Sender is not part of this private chat"
            );
            return Vec::new();
        };

        {
            let mut history = self.history.write().await;
            history.push(msg.clone());
            if history.len() > HISTORY_LIMIT {
                let overflow = history.len() - HISTORY_LIMIT;
                history.drain(..overflow);
            }
        }

        vec![recipient.clone()]
    }

    pub async fn history(&self) -> Vec<ChatMessage> {
        self.history.read().await.clone()
    }
}
