use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::model::{ChatMessage, User};

/// Advisory in-memory log size; durable history lives in the `messages`
/// collection.
pub const HISTORY_LIMIT: usize = 500;

/// A named multi-member room. The global room is a group owned by the
/// system user.
#[derive(Debug)]
pub struct GroupRoom {
    id: String,
    name: String,
    admin: User,
    members: RwLock<Vec<User>>,
    history: RwLock<Vec<ChatMessage>>,
    /// Held across a membership snapshot and its write to storage.
    save_lock: Mutex<()>,
}

impl GroupRoom {
    /// New group with the admin as its sole member.
    pub fn new(id: impl Into<String>, name: impl Into<String>, admin: User) -> Self {
        let members = vec![admin.clone()];
        Self::restore(id, name, admin, members)
    }

    /// Rebuild a group from storage with exactly the given member list.
    pub fn restore(
        id: impl Into<String>,
        name: impl Into<String>,
        admin: User,
        members: Vec<User>,
    ) -> Self {
        let mut unique: Vec<User> = Vec::with_capacity(members.len());
        for member in members {
            if !unique.iter().any(|m| m.same_identity(&member)) {
                unique.push(member);
            }
        }

        GroupRoom {
            id: id.into(),
            name: name.into(),
            admin,
            members: RwLock::new(unique),
            history: RwLock::new(Vec::new()),
            save_lock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn admin(&self) -> &User {
        &self.admin
    }

    pub fn is_admin(&self, user: &User) -> bool {
        self.admin.same_identity(user)
    }

    pub async fn is_member(&self, user: &User) -> bool {
        self.members
            .read()
            .await
            .iter()
            .any(|m| m.same_identity(user))
    }

    /// Add a member. Returns `false` if already present.
    pub async fn invite_member(&self, user: User) -> bool {
        let mut members = self.members.write().await;
        if members.iter().any(|m| m.same_identity(&user)) {
            return false;
        }
        tracing::info!(room_id = %self.id, phone = %user.phone_number, "Member joined group");
        members.push(user);
        true
    }

    /// Unchecked removal. Only reachable through `rooms::access::kick`.
    pub(super) async fn remove_member(&self, target_phone: &str, requester: &User) -> bool {
        let mut members = self.members.write().await;
        let before = members.len();
        members.retain(|m| m.phone_number != target_phone);
        let removed = members.len() != before;
        if removed {
            tracing::info!(
                room_id = %self.id,
                target = %target_phone,
                requester = %requester.phone_number,
                "Member removed from group"
            );
        }
        removed
    }

    /// Snapshot of the member set, safe to iterate while others mutate it.
    pub async fn members(&self) -> Vec<User> {
        self.members.read().await.clone()
    }

    /// Serializes saves of this group so a stale snapshot can never be
    /// written after a newer one.
    pub async fn save_guard(&self) -> MutexGuard<'_, ()> {
        self.save_lock.lock().await
    }

    pub async fn member_phones(&self) -> Vec<String> {
        self.members
            .read()
            .await
            .iter()
            .map(|m| m.phone_number.clone())
            .collect()
    }

    /// Record a message and return the recipients: every current member.
    pub async fn send_message(&self, msg: &ChatMessage) -> Vec<User> {
        {
            let mut history = self.history.write().await;
            history.push(msg.clone());
            if history.len() > HISTORY_LIMIT {
                let overflow = history.len() - HISTORY_LIMIT;
                history.drain(..overflow);
            }
        }

        let members = self.members().await;
        tracing::debug!(
            room_id = %self.id,
            sender = %msg.sender.phone_number,
            recipients = members.len(),
            "Group message recorded"
        );
        members
    }

    pub async fn history(&self) -> Vec<ChatMessage> {
        self.history.read().await.clone()
    }
}
