use sqlx::{Pool, Sqlite};

use crate::db::models::{RoomRecord, PRIVATE_ROOM_TYPE};
use crate::error::AppError;

pub struct RoomRepository;

impl RoomRepository {
    /// Upsert a group row: id, name, admin phone and member phone list.
    pub async fn upsert_group(
        pool: &Pool<Sqlite>,
        id: &str,
        name: &str,
        admin_phone: &str,
        member_phones: &[String],
    ) -> Result<(), AppError> {
        let members = serde_json::to_string(member_phones)?;

        sqlx::query(
            r#"
INSERT INTO rooms (id, type, name, admin_phone, members)
VALUES (?, NULL, ?, ?, ?)
ON CONFLICT(id) DO UPDATE SET
    name = excluded.name,
    admin_phone = excluded.admin_phone,
    members = excluded.members
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(admin_phone)
        .bind(members)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn upsert_private(
        pool: &Pool<Sqlite>,
        id: &str,
        first_phone: &str,
        second_phone: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
INSERT INTO rooms (id, type, user1_phone, user2_phone)
VALUES (?, ?, ?, ?)
ON CONFLICT(id) DO UPDATE SET
    type = excluded.type,
    user1_phone = excluded.user1_phone,
    user2_phone = excluded.user2_phone
            "#,
        )
        .bind(id)
        .bind(PRIVATE_ROOM_TYPE)
        .bind(first_phone)
        .bind(second_phone)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn list_groups(pool: &Pool<Sqlite>) -> Result<Vec<RoomRecord>, AppError> {
        let rows = sqlx::query_as::<_, RoomRecord>("SELECT * FROM rooms WHERE type IS NULL ORDER BY id")
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    pub async fn list_private(pool: &Pool<Sqlite>) -> Result<Vec<RoomRecord>, AppError> {
        let rows = sqlx::query_as::<_, RoomRecord>("SELECT * FROM rooms WHERE type = ? ORDER BY id")
            .bind(PRIVATE_ROOM_TYPE)
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    pub async fn get(pool: &Pool<Sqlite>, id: &str) -> Result<Option<RoomRecord>, AppError> {
        let row = sqlx::query_as::<_, RoomRecord>("SELECT * FROM rooms WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn test_group_upsert_replaces_members() {
        let pool = db::in_memory().await.unwrap();
        let members = vec!["001".to_string(), "002".to_string()];
        RoomRepository::upsert_group(&pool, "g1", "Alumni", "001", &members)
            .await
            .unwrap();
        RoomRepository::upsert_group(&pool, "g1", "Alumni", "001", &members[..1])
            .await
            .unwrap();

        let row = RoomRepository::get(&pool, "g1").await.unwrap().unwrap();
        assert!(!row.is_private());
        assert_eq!(row.member_phones().unwrap(), vec!["001".to_string()]);
        assert_eq!(RoomRepository::list_groups(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_private_rows_are_discriminated() {
        let pool = db::in_memory().await.unwrap();
        RoomRepository::upsert_group(&pool, "g1", "Alumni", "001", &[])
            .await
            .unwrap();
        RoomRepository::upsert_private(&pool, "private_0811_0822", "0811", "0822")
            .await
            .unwrap();

        let groups = RoomRepository::list_groups(&pool).await.unwrap();
        let private = RoomRepository::list_private(&pool).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(private.len(), 1);
        assert!(private[0].is_private());
        assert_eq!(private[0].user2_phone.as_deref(), Some("0822"));
    }
}
