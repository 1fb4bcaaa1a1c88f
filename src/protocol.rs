//! Wire protocol, version 1: one JSON document per WebSocket text frame.
//!
//! Control commands and chat payloads are separate variants of one tagged
//! envelope, parsed once at the connection boundary.

use serde::{Deserialize, Serialize};

use crate::model::{ChatMessage, User};

pub const PROTOCOL_VERSION: u16 = 1;

pub const ROOMLIST_PREFIX: &str = "ROOMLIST:";
pub const OPEN_PRIVATE_PREFIX: &str = "OPEN_PRIVATE:";

/// Inbound frame from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientFrame {
    /// Log in, or register when the phone number is unknown.
    Auth { user: User, password: String },
    #[serde(rename_all = "camelCase")]
    Join { chat_id: String },
    ReqRooms,
    CreateGroup { name: String },
    #[serde(rename_all = "camelCase")]
    Kick { chat_id: String, target_phone: String },
    #[serde(rename_all = "camelCase")]
    ReqPrivate { phone_number: String },
    /// Ordinary chat message; an image when `base64_data` is present.
    #[serde(rename_all = "camelCase")]
    Send {
        chat_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base64_data: Option<String>,
    },
    Logout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseCommand {
    LoginSuccess,
    LoginFailed,
    Roomlist,
    NewMessage,
    Kicked,
    Error,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Message(ChatMessage),
    User(User),
    Text(String),
}

/// Outbound envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub command: ResponseCommand,
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub data: Option<Payload>,
}

impl Response {
    pub fn success(command: ResponseCommand, data: Payload) -> Self {
        Response {
            command,
            success: true,
            message: "OK".to_string(),
            data: Some(data),
        }
    }

    pub fn failure(command: ResponseCommand, reason: impl Into<String>) -> Self {
        Response {
            command,
            success: false,
            message: reason.into(),
            data: None,
        }
    }

    pub fn login_success(user: User) -> Self {
        Self::success(ResponseCommand::LoginSuccess, Payload::User(user))
    }

    pub fn login_failed(reason: impl Into<String>) -> Self {
        Self::failure(ResponseCommand::LoginFailed, reason)
    }

    pub fn new_message(msg: ChatMessage) -> Self {
        Self::success(ResponseCommand::NewMessage, Payload::Message(msg))
    }

    /// `entries` are `(id, name)` pairs.
    pub fn room_list(entries: &[(String, String)]) -> Self {
        let listing = entries
            .iter()
            .map(|(id, name)| format!("{}:{}", id, name))
            .collect::<Vec<_>>()
            .join(",");
        Self::success(
            ResponseCommand::Roomlist,
            Payload::Text(format!("{}{}", ROOMLIST_PREFIX, listing)),
        )
    }

    pub fn kicked(room_id: &str) -> Self {
        Self::success(ResponseCommand::Kicked, Payload::Text(room_id.to_string()))
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::failure(ResponseCommand::Error, reason)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::success(ResponseCommand::System, Payload::Text(text.into()))
    }

    pub fn open_private(room_id: &str, counterpart_name: &str) -> Self {
        Self::system(format!("{}{}:{}", OPEN_PRIVATE_PREFIX, room_id, counterpart_name))
    }

    pub fn message_data(&self) -> Option<&ChatMessage> {
        match &self.data {
            Some(Payload::Message(msg)) => Some(msg),
            _ => None,
        }
    }

    pub fn text_data(&self) -> Option<&str> {
        match &self.data {
            Some(Payload::Text(text)) => Some(text),
            _ => None,
        }
    }
}
