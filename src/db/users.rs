use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use crate::crypto::PasswordDigest;
use crate::db::models::UserRecord;
use crate::error::AppError;
use crate::model::user::is_reserved_phone;
use crate::model::User;

pub struct UserRepository;

impl UserRepository {
    /// Insert a new user with credentials. Returns `None` if the phone
    /// number was registered concurrently.
    pub async fn register(
        pool: &Pool<Sqlite>,
        user: &User,
        digest: &PasswordDigest,
    ) -> Result<Option<UserRecord>, AppError> {
        reject_reserved(user)?;
        let id = Uuid::new_v4().to_string();
        let created_at = chrono::Utc::now().timestamp();

        let record = sqlx::query_as::<_, UserRecord>(
            r#"
INSERT INTO users (phone_number, id, name, profile_image, password_hash, password_salt, created_at)
VALUES (?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(phone_number) DO NOTHING
RETURNING *
            "#,
        )
        .bind(&user.phone_number)
        .bind(&id)
        .bind(&user.name)
        .bind(&user.profile_image)
        .bind(digest.hash())
        .bind(digest.salt())
        .bind(created_at)
        .fetch_optional(pool)
        .await?;

        Ok(record)
    }

    /// Create-or-update the profile fields keyed by phone number. Stored
    /// credentials are never touched here.
    pub async fn upsert_profile(pool: &Pool<Sqlite>, user: &User) -> Result<(), AppError> {
        reject_reserved(user)?;
        let id = user
            .user_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let created_at = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
INSERT INTO users (phone_number, id, name, profile_image, created_at)
VALUES (?, ?, ?, ?, ?)
ON CONFLICT(phone_number) DO UPDATE SET
    name = excluded.name,
    profile_image = COALESCE(excluded.profile_image, users.profile_image)
            "#,
        )
        .bind(&user.phone_number)
        .bind(&id)
        .bind(&user.name)
        .bind(&user.profile_image)
        .bind(created_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn get_by_phone(
        pool: &Pool<Sqlite>,
        phone_number: &str,
    ) -> Result<Option<UserRecord>, AppError> {
        let user = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE phone_number = ?")
            .bind(phone_number)
            .fetch_optional(pool)
            .await?;

        Ok(user)
    }

    pub async fn find_user(pool: &Pool<Sqlite>, phone_number: &str) -> Result<Option<User>, AppError> {
        Ok(Self::get_by_phone(pool, phone_number)
            .await?
            .map(|record| record.to_user()))
    }
}

fn reject_reserved(user: &User) -> Result<(), AppError> {
    if is_reserved_phone(&user.phone_number) {
        return Err(AppError::Validation(format!(
            "Phone number {} is reserved",
            user.phone_number
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn test_register_then_lookup() {
        let pool = db::in_memory().await.unwrap();
        let digest = PasswordDigest::derive("pw").unwrap();

        let record = UserRepository::register(&pool, &User::new("Budi", "0811"), &digest)
            .await
            .unwrap()
            .expect("fresh phone registers");
        assert_eq!(record.name, "Budi");

        let loaded = UserRepository::get_by_phone(&pool, "0811").await.unwrap().unwrap();
        assert!(loaded.digest().unwrap().unwrap().verify("pw").unwrap());
        assert_eq!(loaded.to_user().user_id, Some(record.id));
    }

    #[tokio::test]
    async fn test_second_registration_is_refused() {
        let pool = db::in_memory().await.unwrap();
        let digest = PasswordDigest::derive("pw").unwrap();
        UserRepository::register(&pool, &User::new("Budi", "0811"), &digest)
            .await
            .unwrap();

        let other = PasswordDigest::derive("other").unwrap();
        let again = UserRepository::register(&pool, &User::new("Mallory", "0811"), &other)
            .await
            .unwrap();
        assert!(again.is_none());

        let stored = UserRepository::find_user(&pool, "0811").await.unwrap().unwrap();
        assert_eq!(stored.name, "Budi");
    }

    #[tokio::test]
    async fn test_upsert_profile_keeps_credentials() {
        let pool = db::in_memory().await.unwrap();
        let digest = PasswordDigest::derive("pw").unwrap();
        UserRepository::register(&pool, &User::new("Budi", "0811"), &digest)
            .await
            .unwrap();

        UserRepository::upsert_profile(&pool, &User::new("Budi Santoso", "0811"))
            .await
            .unwrap();

        let record = UserRepository::get_by_phone(&pool, "0811").await.unwrap().unwrap();
        assert_eq!(record.name, "Budi Santoso");
        assert!(record.digest().unwrap().unwrap().verify("pw").unwrap());
    }

    #[tokio::test]
    async fn test_upsert_profile_creates_missing_user() {
        let pool = db::in_memory().await.unwrap();
        UserRepository::upsert_profile(&pool, &User::new("Ani", "0822"))
            .await
            .unwrap();

        let record = UserRepository::get_by_phone(&pool, "0822").await.unwrap().unwrap();
        assert!(record.digest().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reserved_phone_is_never_stored() {
        let pool = db::in_memory().await.unwrap();
        let digest = PasswordDigest::derive("pw").unwrap();

        let registered = UserRepository::register(&pool, &User::new("System", "0000"), &digest).await;
        assert!(matches!(registered, Err(AppError::Validation(_))));

        let upserted = UserRepository::upsert_profile(&pool, &User::new("System", "0000")).await;
        assert!(matches!(upserted, Err(AppError::Validation(_))));

        assert!(UserRepository::find_user(&pool, "0000").await.unwrap().is_none());
    }
}
