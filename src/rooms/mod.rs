pub mod access;
pub mod directory;
pub mod group;
pub mod private;

pub use directory::RoomDirectory;
pub use group::GroupRoom;
pub use private::PrivateRoom;

use std::sync::Arc;

use crate::model::{ChatMessage, User};

pub const GLOBAL_ROOM_ID: &str = "global_room";
pub const GLOBAL_ROOM_NAME: &str = "Global Chat";

/// A destination for messages.
#[derive(Debug, Clone)]
pub enum Room {
    Group(Arc<GroupRoom>),
    Private(Arc<PrivateRoom>),
}

impl Room {
    pub fn id(&self) -> &str {
        match self {
            Room::Group(group) => group.id(),
            Room::Private(private) => private.id(),
        }
    }

    pub fn is_global(&self) -> bool {
        self.id() == GLOBAL_ROOM_ID
    }

    pub fn as_group(&self) -> Option<&Arc<GroupRoom>> {
        match self {
            Room::Group(group) => Some(group),
            Room::Private(_) => None,
        }
    }

    /// Whether `user` may post here: a member of a group, or one of the two
    /// participants of a private chat.
    pub async fn accepts(&self, user: &User) -> bool {
        match self {
            Room::Group(group) => group.is_member(user).await,
            Room::Private(private) => private.is_participant(user),
        }
    }

    /// Record `msg` and return the users it should be delivered to.
    pub async fn send_message(&self, msg: &ChatMessage) -> Vec<User> {
        match self {
            Room::Group(group) => group.send_message(msg).await,
            Room::Private(private) => private.send_message(msg).await,
        }
    }
}
