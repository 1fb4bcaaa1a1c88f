use std::sync::Arc;

use sqlx::{Pool, Sqlite};

use crate::config::Config;
use crate::rooms::RoomDirectory;
use crate::session::SessionRegistry;

/// Services shared by every connection, constructed once at startup.
#[derive(Clone)]
pub struct AppState {
    pub db: Pool<Sqlite>,
    pub rooms: Arc<RoomDirectory>,
    pub sessions: Arc<SessionRegistry>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Bootstrap the room directory over `db` with an empty session registry.
    pub async fn new(db: Pool<Sqlite>, config: Config) -> Self {
        let rooms = RoomDirectory::bootstrap(db.clone()).await;
        AppState {
            db,
            rooms: Arc::new(rooms),
            sessions: Arc::new(SessionRegistry::new()),
            config: Arc::new(config),
        }
    }
}
