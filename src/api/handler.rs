//! Per-connection protocol state machine.
//!
//! A `ConnectionHandler` knows nothing about sockets: it consumes parsed
//! `ClientFrame`s and writes `Response`s through its `ConnectionHandle`. The
//! WebSocket actor in `api::ws` feeds it; tests drive it directly.

use uuid::Uuid;

use crate::api::state::AppState;
use crate::crypto::PasswordDigest;
use crate::db::{MessageRepository, UserRecord, UserRepository};
use crate::error::AppError;
use crate::model::message::{JOINED, LEFT, SYSTEM_NOTICE_CHAT_ID};
use crate::model::user::is_reserved_phone;
use crate::model::{ChatMessage, User};
use crate::protocol::{ClientFrame, Response};
use crate::rooms::{access, Room, GLOBAL_ROOM_ID};
use crate::session::ConnectionHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Connected, not yet authenticated.
    Connecting,
    /// Logged in and bound in the session registry.
    Authenticated,
    /// Joined at least one room.
    Active,
    Closed,
}

/// What the read loop should do after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

pub struct ConnectionHandler {
    state: AppState,
    conn: ConnectionHandle,
    user: Option<User>,
    phase: Phase,
}

impl ConnectionHandler {
    pub fn new(state: AppState, conn: ConnectionHandle) -> Self {
        ConnectionHandler {
            state,
            conn,
            user: None,
            phase: Phase::Connecting,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn.id()
    }

    /// Parse and handle one raw text frame. Malformed frames get an `ERROR`
    /// reply and leave the connection open.
    pub async fn handle_text(&mut self, raw: &str) -> Flow {
        match serde_json::from_str::<ClientFrame>(raw) {
            Ok(frame) => self.handle(frame).await,
            Err(e) => {
                tracing::warn!(conn_id = %self.conn.id(), error = %e, "Malformed frame");
                self.reply(Response::error(AppError::from(e).client_message()));
                Flow::Continue
            }
        }
    }

    pub async fn handle(&mut self, frame: ClientFrame) -> Flow {
        if self.phase == Phase::Closed {
            return Flow::Close;
        }
        if self.is_superseded() {
            self.retire_superseded();
            return Flow::Close;
        }

        let result = match frame {
            ClientFrame::Auth { user, password } => self.handle_auth(user, &password).await,
            ClientFrame::Join { chat_id } => self.handle_join(&chat_id).await,
            ClientFrame::ReqRooms => {
                self.handle_room_request();
                Ok(())
            }
            ClientFrame::CreateGroup { name } => self.handle_create_group(&name).await,
            ClientFrame::Kick {
                chat_id,
                target_phone,
            } => self.handle_kick(&chat_id, &target_phone).await,
            ClientFrame::ReqPrivate { phone_number } => {
                self.handle_private_request(&phone_number).await
            }
            ClientFrame::Send {
                chat_id,
                content,
                base64_data,
            } => self.handle_send(chat_id, content, base64_data).await,
            ClientFrame::Logout => {
                tracing::info!(conn_id = %self.conn.id(), "Logout requested");
                return Flow::Close;
            }
        };

        if let Err(e) = result {
            if matches!(e, AppError::Database(_) | AppError::Crypto(_) | AppError::Internal(_)) {
                tracing::error!(conn_id = %self.conn.id(), error = %e, "Request failed");
            }
            self.reply(Response::error(e.client_message()));
        }
        Flow::Continue
    }

    /// Logged in, but the registry now routes this phone elsewhere.
    fn is_superseded(&self) -> bool {
        match &self.user {
            Some(user) => !self.state.sessions.owns(user.key(), self.conn.id()),
            None => false,
        }
    }

    /// Drop the identity without touching the newer connection's binding.
    fn retire_superseded(&mut self) {
        if let Some(user) = self.user.take() {
            tracing::info!(
                conn_id = %self.conn.id(),
                phone = %user.phone_number,
                "Frame from superseded connection, closing"
            );
        }
        self.phase = Phase::Closed;
        self.reply(Response::error("Signed in from another connection"));
    }

    fn authenticated(&self) -> Result<User, AppError> {
        self.user
            .clone()
            .ok_or_else(|| AppError::Auth("Please log in first".to_string()))
    }

    fn reply(&self, response: Response) {
        if !self.conn.send(response) {
            tracing::debug!(conn_id = %self.conn.id(), "Reply dropped, writer closed");
        }
    }

    /// Success notice from the server to this connection only.
    fn notify(&self, text: String) {
        let notice = ChatMessage::text(SYSTEM_NOTICE_CHAT_ID, User::system("SYSTEM"), text);
        self.reply(Response::new_message(notice));
    }

    fn bind_session(&mut self, user: User) {
        if let Some(previous) = &self.user {
            if !previous.same_identity(&user) {
                self.state.sessions.unbind(previous.key(), self.conn.id());
            }
        }

        self.state.sessions.bind(user.key(), self.conn.clone());
        self.user = Some(user);
        if self.phase == Phase::Connecting {
            self.phase = Phase::Authenticated;
        }
    }

    async fn handle_auth(&mut self, submitted: User, password: &str) -> Result<(), AppError> {
        let phone = submitted.phone_number.trim().to_string();
        if phone.is_empty() {
            self.reply(Response::login_failed("Phone number is required"));
            return Ok(());
        }
        if is_reserved_phone(&phone) {
            tracing::warn!(phone = %phone, "Login with reserved phone rejected");
            self.reply(Response::login_failed("This phone number is reserved"));
            return Ok(());
        }

        if let Some(record) = UserRepository::get_by_phone(&self.state.db, &phone).await? {
            return self.verify_login(record, password);
        }

        let digest = PasswordDigest::derive(password)?;
        let candidate = User {
            user_id: None,
            phone_number: phone.clone(),
            ..submitted
        };

        match UserRepository::register(&self.state.db, &candidate, &digest).await? {
            Some(record) => {
                let user = record.to_user();
                tracing::info!(phone = %phone, name = %user.name, "New user registered");
                self.bind_session(user.clone());
                self.reply(Response::login_success(user));
                Ok(())
            }
            None => {
                // registered concurrently by another connection
                let record = UserRepository::get_by_phone(&self.state.db, &phone)
                    .await?
                    .ok_or_else(|| AppError::Internal("User vanished after conflict".to_string()))?;
                self.verify_login(record, password)
            }
        }
    }

    fn verify_login(&mut self, record: UserRecord, password: &str) -> Result<(), AppError> {
        let matches = match record.digest()? {
            Some(digest) => digest.verify(password)?,
            None => false,
        };

        if !matches {
            tracing::warn!(phone = %record.phone_number, "Login failed");
            self.reply(Response::login_failed("Wrong password"));
            return Ok(());
        }

        let user = record.to_user();
        tracing::info!(phone = %user.phone_number, name = %user.name, "User logged in");
        self.bind_session(user.clone());
        self.reply(Response::login_success(user));
        Ok(())
    }

    async fn handle_join(&mut self, chat_id: &str) -> Result<(), AppError> {
        let user = self.authenticated()?;
        let room = self
            .state
            .rooms
            .get_room(chat_id)
            .ok_or_else(|| AppError::NotFound(format!("Room {} not found", chat_id)))?;

        if let Room::Private(private) = &room {
            if !private.is_participant(&user) {
                return Err(AppError::Unauthorized(
                    "You are not a participant of this chat".to_string(),
                ));
            }
        }

        // the session was bound at login; re-binding here could steal it
        // back from a newer connection
        if let Err(e) = UserRepository::upsert_profile(&self.state.db, &user).await {
            tracing::error!(phone = %user.phone_number, error = %e, "Failed to save user");
        }

        if let Room::Group(group) = &room {
            group.invite_member(user.clone()).await;
            if !room.is_global() {
                if let Err(e) = self.state.rooms.save_group(group).await {
                    tracing::error!(room_id = %chat_id, error = %e, "Failed to save group");
                }
            }
        }

        self.phase = Phase::Active;
        tracing::info!(phone = %user.phone_number, room_id = %chat_id, "User joined room");

        // join notices are global so every sidebar can update
        let joined = ChatMessage::text(chat_id, user, JOINED);
        self.state.sessions.broadcast(&Response::new_message(joined));

        self.replay_history(chat_id).await;
        Ok(())
    }

    async fn replay_history(&self, chat_id: &str) {
        match MessageRepository::history(&self.state.db, chat_id).await {
            Ok(history) => {
                tracing::debug!(room_id = %chat_id, messages = history.len(), "Replaying history");
                for msg in history {
                    self.reply(Response::new_message(msg));
                }
            }
            Err(e) => tracing::error!(room_id = %chat_id, error = %e, "Failed to load history"),
        }
    }

    fn handle_room_request(&self) {
        let listing = self.state.rooms.group_listing();
        self.reply(Response::room_list(&listing));
    }

    async fn handle_create_group(&mut self, name: &str) -> Result<(), AppError> {
        let user = self.authenticated()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Group name must not be empty".to_string()));
        }
        if name.contains([',', ':']) {
            return Err(AppError::Validation(
                "Group name must not contain ',' or ':'".to_string(),
            ));
        }

        let group = self.state.rooms.create_new_group(name, user.clone()).await;
        tracing::info!(room_id = %group.id(), name = %name, admin = %user.phone_number, "Group created");

        let listing = self.state.rooms.group_listing();
        self.state.sessions.broadcast(&Response::room_list(&listing));
        Ok(())
    }

    async fn handle_kick(&mut self, chat_id: &str, target_phone: &str) -> Result<(), AppError> {
        let user = self.authenticated()?;
        let target = target_phone.trim();
        if target.is_empty() || target.contains(char::is_whitespace) {
            return Err(AppError::Validation(
                "Usage: KICK needs exactly one target phone number".to_string(),
            ));
        }

        let room = self
            .state
            .rooms
            .get_room(chat_id)
            .ok_or_else(|| AppError::NotFound(format!("Room {} not found", chat_id)))?;
        let Some(group) = room.as_group() else {
            return Err(AppError::Validation(
                "Kick is only available in group rooms".to_string(),
            ));
        };

        if !access::kick(group, target, &user).await? {
            return Err(AppError::NotFound(format!(
                "{} is not a member of {}",
                target,
                group.name()
            )));
        }

        if let Err(e) = self.state.rooms.save_group(group).await {
            tracing::error!(room_id = %chat_id, error = %e, "Failed to save group after kick");
        }

        self.state.sessions.send_to(target, Response::kicked(chat_id));
        self.notify(format!("Removed {} from {}", target, group.name()));

        let announcement = ChatMessage::text(
            chat_id,
            User::system("SYSTEM"),
            format!("{} removed {} from the group", user.name, target),
        );
        self.deliver(&room, announcement).await;

        tracing::info!(room_id = %chat_id, target = %target, admin = %user.phone_number, "Kick succeeded");
        Ok(())
    }

    async fn handle_private_request(&mut self, phone_number: &str) -> Result<(), AppError> {
        let user = self.authenticated()?;
        let target = UserRepository::find_user(&self.state.db, phone_number.trim())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No user with phone {}", phone_number)))?;

        let room = self
            .state
            .rooms
            .get_or_create_private_chat(&user, &target)
            .await?;
        self.reply(Response::open_private(room.id(), &target.name));
        Ok(())
    }

    async fn handle_send(
        &mut self,
        chat_id: String,
        content: String,
        base64_data: Option<String>,
    ) -> Result<(), AppError> {
        let user = self.authenticated()?;

        let Some(room) = self.state.rooms.get_room(&chat_id) else {
            tracing::warn!(room_id = %chat_id, sender = %user.phone_number, "Room not found, message dropped");
            return Ok(());
        };

        if !room.accepts(&user).await {
            return match room {
                Room::Group(_) => Err(AppError::Validation(
                    "You are not a member of this group".to_string(),
                )),
                Room::Private(_) => {
                    tracing::warn!(room_id = %chat_id, sender = %user.phone_number, "Non-participant message dropped");
                    Ok(())
                }
            };
        }

        let msg = match base64_data {
            Some(data) => ChatMessage::image(chat_id, user, content, data),
            None => ChatMessage::text(chat_id, user, content),
        };
        self.deliver(&room, msg).await;
        Ok(())
    }

    /// Persist, record in the room, then fan out to live recipients.
    async fn deliver(&self, room: &Room, msg: ChatMessage) {
        if let Err(e) = MessageRepository::append(&self.state.db, &msg).await {
            tracing::error!(room_id = %room.id(), error = %e, "Failed to persist message");
        }

        let recipients = room.send_message(&msg).await;
        let response = Response::new_message(msg);
        let delivered = recipients
            .iter()
            .filter(|recipient| self.state.sessions.send_to(recipient.key(), response.clone()))
            .count();

        tracing::debug!(
            room_id = %room.id(),
            recipients = recipients.len(),
            delivered,
            "Message routed"
        );
    }

    /// Unbind the session and announce the departure. Runs once; later
    /// calls are no-ops.
    pub fn shutdown(&mut self) {
        if self.phase == Phase::Closed {
            return;
        }
        self.phase = Phase::Closed;

        let Some(user) = self.user.take() else {
            return;
        };

        if self.state.sessions.unbind(user.key(), self.conn.id()) {
            tracing::info!(phone = %user.phone_number, name = %user.name, "User left");
            let left = ChatMessage::text(GLOBAL_ROOM_ID, user, LEFT);
            self.state.sessions.broadcast(&Response::new_message(left));
        } else {
            tracing::debug!(phone = %user.phone_number, "Superseded connection closed");
        }
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
