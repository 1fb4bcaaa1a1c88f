use serde::{Deserialize, Serialize};

pub const SYSTEM_PHONE: &str = "0000";

/// Identity record. The phone number is the identity key for sessions,
/// membership, admin checks and private-chat participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub name: String,
    pub phone_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
}

impl User {
    pub fn new(name: impl Into<String>, phone_number: impl Into<String>) -> Self {
        User {
            user_id: None,
            name: name.into(),
            phone_number: phone_number.into(),
            profile_image: None,
        }
    }

    /// Admin of the global room and author of server notices.
    pub fn system(name: &str) -> Self {
        User::new(name, SYSTEM_PHONE)
    }

    pub fn key(&self) -> &str {
        &self.phone_number
    }

    pub fn same_identity(&self, other: &User) -> bool {
        self.phone_number == other.phone_number
    }

    pub fn is_system(&self) -> bool {
        is_reserved_phone(&self.phone_number)
    }
}

/// Phone numbers no client may register or log in as.
pub fn is_reserved_phone(phone: &str) -> bool {
    phone.trim() == SYSTEM_PHONE
}
