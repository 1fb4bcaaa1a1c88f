use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use super::{GroupRoom, PrivateRoom, Room, GLOBAL_ROOM_ID, GLOBAL_ROOM_NAME};
use crate::db::{RoomRecord, RoomRepository, UserRepository};
use crate::error::AppError;
use crate::model::User;

/// Registry of every known room by id. Always holds the global room.
#[derive(Debug)]
pub struct RoomDirectory {
    db: Pool<Sqlite>,
    rooms: DashMap<String, Room>,
}

impl RoomDirectory {
    /// Create the global room, then load persisted groups and private chats.
    /// Load failures are logged; the directory still comes up.
    pub async fn bootstrap(db: Pool<Sqlite>) -> Self {
        let directory = RoomDirectory {
            db,
            rooms: DashMap::new(),
        };

        let global = GroupRoom::new(GLOBAL_ROOM_ID, GLOBAL_ROOM_NAME, User::system("System"));
        directory
            .rooms
            .insert(GLOBAL_ROOM_ID.to_string(), Room::Group(Arc::new(global)));

        if let Err(e) = directory.load_groups().await {
            tracing::warn!(error = %e, "Failed to load groups");
        }
        if let Err(e) = directory.load_private_chats().await {
            tracing::warn!(error = %e, "Failed to load private chats");
        }

        tracing::info!(rooms = directory.rooms.len(), "Room directory ready");
        directory
    }

    async fn load_groups(&self) -> Result<(), AppError> {
        for record in RoomRepository::list_groups(&self.db).await? {
            if record.id == GLOBAL_ROOM_ID {
                continue;
            }
            match self.restore_group(&record).await {
                Ok(group) => {
                    tracing::info!(room_id = %record.id, name = %group.name(), "Group loaded");
                    self.rooms.insert(record.id.clone(), Room::Group(Arc::new(group)));
                }
                Err(e) => tracing::warn!(room_id = %record.id, error = %e, "Skipping group"),
            }
        }
        Ok(())
    }

    async fn restore_group(&self, record: &RoomRecord) -> Result<GroupRoom, AppError> {
        let name = record.name.clone().unwrap_or_default();
        let admin_phone = record.admin_phone.clone().unwrap_or_default();

        let admin = match UserRepository::find_user(&self.db, &admin_phone).await {
            Ok(Some(admin)) => admin,
            Ok(None) => User::new("Unknown", admin_phone.clone()),
            Err(e) => {
                tracing::warn!(room_id = %record.id, phone = %admin_phone, error = %e, "Admin lookup failed");
                User::new("Unknown", admin_phone.clone())
            }
        };

        let mut members = Vec::new();
        for phone in record.member_phones()? {
            match UserRepository::find_user(&self.db, &phone).await {
                Ok(Some(user)) => members.push(user),
                Ok(None) => tracing::debug!(room_id = %record.id, phone = %phone, "Unknown member skipped"),
                Err(e) => {
                    tracing::warn!(room_id = %record.id, phone = %phone, error = %e, "Member lookup failed, skipped")
                }
            }
        }

        Ok(GroupRoom::restore(record.id.clone(), name, admin, members))
    }

    async fn load_private_chats(&self) -> Result<(), AppError> {
        for record in RoomRepository::list_private(&self.db).await? {
            let first = self.resolve_optional(record.user1_phone.as_deref()).await?;
            let second = self.resolve_optional(record.user2_phone.as_deref()).await?;

            match (first, second) {
                (Some(first), Some(second)) => {
                    let room = PrivateRoom::new(record.id.clone(), first, second);
                    self.rooms.insert(record.id.clone(), Room::Private(Arc::new(room)));
                }
                _ => tracing::debug!(room_id = %record.id, "Private chat with unknown participant skipped"),
            }
        }
        Ok(())
    }

    async fn resolve_optional(&self, phone: Option<&str>) -> Result<Option<User>, AppError> {
        match phone {
            Some(phone) => UserRepository::find_user(&self.db, phone).await,
            None => Ok(None),
        }
    }

    pub fn get_room(&self, id: &str) -> Option<Room> {
        self.rooms.get(id).map(|entry| entry.value().clone())
    }

    /// Snapshot of every room.
    pub fn all_rooms(&self) -> Vec<Room> {
        self.rooms.iter().map(|entry| entry.value().clone()).collect()
    }

    /// `(id, name)` of every group room, global room first, then by id.
    /// Private chats are never listed.
    pub fn group_listing(&self) -> Vec<(String, String)> {
        let mut listing: Vec<(String, String)> = self
            .all_rooms()
            .into_iter()
            .filter_map(|room| match room {
                Room::Group(group) => Some((group.id().to_string(), group.name().to_string())),
                Room::Private(_) => None,
            })
            .collect();

        listing.sort_by(|a, b| {
            (a.0 != GLOBAL_ROOM_ID, &a.0).cmp(&(b.0 != GLOBAL_ROOM_ID, &b.0))
        });
        listing
    }

    /// New group with `admin` as admin and sole member. The group is
    /// registered even if persisting it fails.
    pub async fn create_new_group(&self, name: &str, admin: User) -> Arc<GroupRoom> {
        let id = format!("group_{}", Uuid::new_v4().simple());
        let group = Arc::new(GroupRoom::new(id.clone(), name, admin));

        self.rooms.insert(id, Room::Group(group.clone()));
        if let Err(e) = self.save_group(&group).await {
            tracing::error!(room_id = %group.id(), error = %e, "Failed to persist new group");
        }
        group
    }

    /// Upsert the group's id, name, admin and members, and (re)register it.
    pub async fn save_group(&self, group: &Arc<GroupRoom>) -> Result<(), AppError> {
        let _guard = group.save_guard().await;
        let members = group.member_phones().await;
        RoomRepository::upsert_group(
            &self.db,
            group.id(),
            group.name(),
            &group.admin().phone_number,
            &members,
        )
        .await?;

        self.rooms
            .insert(group.id().to_string(), Room::Group(group.clone()));
        tracing::debug!(room_id = %group.id(), members = members.len(), "Group saved");
        Ok(())
    }

    /// Same id for either argument order.
    pub fn private_chat_id(first: &User, second: &User) -> String {
        let (low, high) = if first.phone_number <= second.phone_number {
            (&first.phone_number, &second.phone_number)
        } else {
            (&second.phone_number, &first.phone_number)
        };
        format!("private_{}_{}", low, high)
    }

    /// Existing private chat between the pair, or a new registered one.
    pub async fn get_or_create_private_chat(&self, first: &User, second: &User) -> Result<Room, AppError> {
        if first.same_identity(second) {
            return Err(AppError::Validation(
                "Cannot open a private chat with yourself".to_string(),
            ));
        }

        let id = Self::private_chat_id(first, second);
        let room = match self.rooms.entry(id.clone()) {
            Entry::Occupied(entry) => return Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let room = Arc::new(PrivateRoom::new(id.clone(), first.clone(), second.clone()));
                entry.insert(Room::Private(room.clone()));
                room
            }
        };

        tracing::info!(room_id = %id, "Private chat created");
        if let Err(e) = RoomRepository::upsert_private(
            &self.db,
            &id,
            &room.first_participant().phone_number,
            &room.second_participant().phone_number,
        )
        .await
        {
            tracing::error!(room_id = %id, error = %e, "Failed to persist private chat");
        }

        Ok(Room::Private(room))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PasswordDigest;
    use crate::db;
    use crate::rooms::access;

    async fn seed_user(pool: &Pool<Sqlite>, name: &str, phone: &str) -> User {
        let digest = PasswordDigest::derive("pw").unwrap();
        UserRepository::register(pool, &User::new(name, phone), &digest)
            .await
            .unwrap()
            .unwrap()
            .to_user()
    }

    #[tokio::test]
    async fn test_bootstrap_creates_global_room() {
        let directory = RoomDirectory::bootstrap(db::in_memory().await.unwrap()).await;
        let global = directory.get_room(GLOBAL_ROOM_ID).unwrap();
        let group = global.as_group().unwrap();
        assert_eq!(group.name(), GLOBAL_ROOM_NAME);
        assert_eq!(group.admin().phone_number, "0000");
        assert_eq!(directory.all_rooms().len(), 1);
    }

    #[tokio::test]
    async fn test_private_chat_is_order_independent_and_idempotent() {
        let directory = RoomDirectory::bootstrap(db::in_memory().await.unwrap()).await;
        let a = User::new("Budi", "0811");
        let b = User::new("Ani", "0822");

        let ab = directory.get_or_create_private_chat(&a, &b).await.unwrap();
        let ba = directory.get_or_create_private_chat(&b, &a).await.unwrap();
        let again = directory.get_or_create_private_chat(&a, &b).await.unwrap();

        assert_eq!(ab.id(), "private_0811_0822");
        assert_eq!(ab.id(), ba.id());
        match (&ab, &again) {
            (Room::Private(x), Room::Private(y)) => assert!(Arc::ptr_eq(x, y)),
            _ => panic!("expected private rooms"),
        }
    }

    #[tokio::test]
    async fn test_private_chat_with_self_is_rejected() {
        let directory = RoomDirectory::bootstrap(db::in_memory().await.unwrap()).await;
        let a = User::new("Budi", "0811");
        assert!(matches!(
            directory.get_or_create_private_chat(&a, &a).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_group_listing_excludes_private_chats() {
        let directory = RoomDirectory::bootstrap(db::in_memory().await.unwrap()).await;
        let a = User::new("Budi", "0811");
        let b = User::new("Ani", "0822");

        let group = directory.create_new_group("Alumni", a.clone()).await;
        directory.get_or_create_private_chat(&a, &b).await.unwrap();

        let listing = directory.group_listing();
        assert_eq!(listing[0].0, GLOBAL_ROOM_ID);
        assert!(listing.contains(&(group.id().to_string(), "Alumni".to_string())));
        assert!(listing.iter().all(|(id, _)| !id.starts_with("private_")));
        assert_eq!(listing.len(), 2);
    }

    #[tokio::test]
    async fn test_new_group_ids_are_unique() {
        let directory = RoomDirectory::bootstrap(db::in_memory().await.unwrap()).await;
        let admin = User::new("Budi", "0811");
        let first = directory.create_new_group("A", admin.clone()).await;
        let second = directory.create_new_group("A", admin).await;
        assert_ne!(first.id(), second.id());
    }

    #[tokio::test]
    async fn test_bootstrap_restores_persisted_rooms() {
        let pool = db::in_memory().await.unwrap();
        let budi = seed_user(&pool, "Budi", "0811").await;
        let ani = seed_user(&pool, "Ani", "0822").await;

        RoomRepository::upsert_group(
            &pool,
            "group_x",
            "Alumni",
            "0811",
            &["0811".to_string(), "0822".to_string(), "0999".to_string()],
        )
        .await
        .unwrap();
        // a stored record reusing the global id must not replace the global room
        RoomRepository::upsert_group(&pool, GLOBAL_ROOM_ID, "Hijacked", "0811", &[])
            .await
            .unwrap();
        RoomRepository::upsert_private(&pool, "private_0811_0822", "0811", "0822")
            .await
            .unwrap();
        RoomRepository::upsert_private(&pool, "private_0811_0999", "0811", "0999")
            .await
            .unwrap();

        let directory = RoomDirectory::bootstrap(pool).await;

        let group = directory.get_room("group_x").unwrap();
        let group = group.as_group().unwrap();
        assert!(group.is_admin(&budi));
        assert!(group.is_member(&ani).await);
        assert_eq!(group.member_phones().await.len(), 2);

        let global = directory.get_room(GLOBAL_ROOM_ID).unwrap();
        assert_eq!(global.as_group().unwrap().name(), GLOBAL_ROOM_NAME);

        assert!(matches!(directory.get_room("private_0811_0822"), Some(Room::Private(_))));
        assert!(directory.get_room("private_0811_0999").is_none());
    }

    #[tokio::test]
    async fn test_save_group_persists_membership() {
        let pool = db::in_memory().await.unwrap();
        let directory = RoomDirectory::bootstrap(pool.clone()).await;
        let group = directory
            .create_new_group("Alumni", User::new("Budi", "0811"))
            .await;
        group.invite_member(User::new("Ani", "0822")).await;
        directory.save_group(&group).await.unwrap();

        let row = RoomRepository::get(&pool, group.id()).await.unwrap().unwrap();
        assert_eq!(row.member_phones().unwrap(), vec!["0811".to_string(), "0822".to_string()]);
        assert_eq!(row.admin_phone.as_deref(), Some("0811"));
    }

    #[tokio::test]
    async fn test_save_waits_for_in_flight_save_and_writes_latest_members() {
        let pool = db::in_memory().await.unwrap();
        let directory = Arc::new(RoomDirectory::bootstrap(pool.clone()).await);
        let group = directory
            .create_new_group("Alumni", User::new("Budi", "0811"))
            .await;
        group.invite_member(User::new("Ani", "0822")).await;

        let guard = group.save_guard().await;
        let pending = {
            let directory = directory.clone();
            let group = group.clone();
            tokio::spawn(async move { directory.save_group(&group).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!pending.is_finished());

        // membership changes while the save is queued behind the guard
        access::kick(&group, "0822", &User::new("Budi", "0811")).await.unwrap();
        drop(guard);
        pending.await.unwrap().unwrap();

        let row = RoomRepository::get(&pool, group.id()).await.unwrap().unwrap();
        assert_eq!(row.member_phones().unwrap(), group.member_phones().await);
        assert_eq!(row.member_phones().unwrap(), vec!["0811".to_string()]);
    }

    #[tokio::test]
    async fn test_restore_survives_failed_member_lookups() {
        let pool = db::in_memory().await.unwrap();
        let directory = RoomDirectory::bootstrap(pool.clone()).await;
        let record = RoomRecord {
            id: "group_x".to_string(),
            kind: None,
            name: Some("Alumni".to_string()),
            admin_phone: Some("0811".to_string()),
            members: Some(r#"["0811","0822"]"#.to_string()),
            user1_phone: None,
            user2_phone: None,
        };

        // every lookup now fails
        pool.close().await;
        let group = directory.restore_group(&record).await.unwrap();

        assert_eq!(group.name(), "Alumni");
        assert_eq!(group.admin().name, "Unknown");
        assert!(group.member_phones().await.is_empty());
    }
}
