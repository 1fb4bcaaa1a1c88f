//! Live sessions: which connection currently represents which phone number.
//!
//! Every connection owns a single writer fed by an unbounded channel. Replies
//! from the connection's own read loop and fan-out from other connections go
//! through the same channel, so frames for one peer are written one at a
//! time and never interleave.

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::Response;

/// Instruction for a connection's writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Frame(Response),
    /// Close the connection with a reason, e.g. superseded by a newer login.
    Close(String),
}

pub type ConnectionSender = mpsc::UnboundedSender<Outbound>;

/// Cloneable address of one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: ConnectionSender,
}

impl ConnectionHandle {
    pub fn open() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle { id: Uuid::new_v4(), tx }, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue a response. Returns `false` if the writer is gone.
    pub fn send(&self, response: Response) -> bool {
        self.tx.send(Outbound::Frame(response)).is_ok()
    }

    pub fn close(&self, reason: &str) {
        let _ = self.tx.send(Outbound::Close(reason.to_string()));
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, ConnectionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `phone` to `handle`. A different connection previously bound to
    /// the same phone is told to close and is returned.
    pub fn bind(&self, phone: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let conn_id = handle.id();
        let previous = self.sessions.insert(phone.to_string(), handle)?;

        if previous.id() == conn_id {
            return None;
        }

        tracing::info!(
            phone = %phone,
            old_conn = %previous.id(),
            new_conn = %conn_id,
            "Session superseded, closing previous connection"
        );
        previous.close("Signed in from another connection");
        Some(previous)
    }

    /// Remove the binding for `phone` only if it still belongs to `conn_id`.
    pub fn unbind(&self, phone: &str, conn_id: Uuid) -> bool {
        self.sessions
            .remove_if(phone, |_, handle| handle.id() == conn_id)
            .is_some()
    }

    /// Whether `phone` is currently bound to `conn_id`.
    pub fn owns(&self, phone: &str, conn_id: Uuid) -> bool {
        self.sessions
            .get(phone)
            .is_some_and(|entry| entry.value().id() == conn_id)
    }

    pub fn get(&self, phone: &str) -> Option<ConnectionHandle> {
        self.sessions.get(phone).map(|entry| entry.value().clone())
    }

    pub fn is_online(&self, phone: &str) -> bool {
        self.sessions.contains_key(phone)
    }

    /// Deliver to the connection bound to `phone`, if any.
    pub fn send_to(&self, phone: &str, response: Response) -> bool {
        match self.get(phone) {
            Some(handle) => handle.send(response),
            None => false,
        }
    }

    /// Deliver to every live session. Returns how many were queued.
    pub fn broadcast(&self, response: &Response) -> usize {
        // snapshot first so no shard lock is held while sending
        let handles: Vec<ConnectionHandle> =
            self.sessions.iter().map(|entry| entry.value().clone()).collect();

        handles
            .iter()
            .filter(|handle| handle.send(response.clone()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(text: &str) -> Response {
        Response::system(text)
    }

    #[test]
    fn test_send_to_bound_phone() {
        let registry = SessionRegistry::new();
        let (handle, mut rx) = ConnectionHandle::open();
        registry.bind("0811", handle);

        assert!(registry.send_to("0811", notice("hi")));
        assert!(!registry.send_to("0822", notice("hi")));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Frame(notice("hi")));
    }

    #[test]
    fn test_rebind_closes_previous_connection() {
        let registry = SessionRegistry::new();
        let (old, mut old_rx) = ConnectionHandle::open();
        let (new, _new_rx) = ConnectionHandle::open();
        let old_id = old.id();

        registry.bind("0811", old);
        let replaced = registry.bind("0811", new.clone()).unwrap();

        assert_eq!(replaced.id(), old_id);
        assert!(matches!(old_rx.try_recv().unwrap(), Outbound::Close(_)));
        assert_eq!(registry.get("0811").unwrap().id(), new.id());
    }

    #[test]
    fn test_rebind_same_connection_is_silent() {
        let registry = SessionRegistry::new();
        let (handle, mut rx) = ConnectionHandle::open();
        registry.bind("0811", handle.clone());
        assert!(registry.bind("0811", handle).is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stale_unbind_keeps_newer_session() {
        let registry = SessionRegistry::new();
        let (old, _old_rx) = ConnectionHandle::open();
        let (new, _new_rx) = ConnectionHandle::open();
        let old_id = old.id();

        registry.bind("0811", old);
        registry.bind("0811", new.clone());

        assert!(!registry.owns("0811", old_id));
        assert!(registry.owns("0811", new.id()));
        assert!(!registry.unbind("0811", old_id));
        assert!(registry.is_online("0811"));
        assert!(registry.unbind("0811", new.id()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_broadcast_skips_dead_connections() {
        let registry = SessionRegistry::new();
        let (alive, mut alive_rx) = ConnectionHandle::open();
        let (dead, dead_rx) = ConnectionHandle::open();
        drop(dead_rx);

        registry.bind("0811", alive);
        registry.bind("0822", dead);

        assert_eq!(registry.broadcast(&notice("all")), 1);
        assert!(alive_rx.try_recv().is_ok());
    }
}
