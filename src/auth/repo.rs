use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::repo_types::{NewUser, RefreshToken, User, UserChanges},
    db::PgStore,
    error::{AppError, AppResult},
};

/// User rows. Deleting a user cascades to their tokens, linkage edges and plans.
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<User>>;
    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>>;
    /// Inserts the user and, when `doctor_id` is set, the linkage edge, atomically.
    async fn create(&self, new: NewUser) -> AppResult<User>;
    async fn update(&self, id: Uuid, changes: UserChanges) -> AppResult<User>;
    async fn delete(&self, id: Uuid) -> AppResult<()>;
}

/// Persisted refresh tokens.
#[async_trait]
pub trait TokenRepo: Send + Sync {
    async fn insert(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> AppResult<RefreshToken>;

    /// Consumes `old` and stores `new` in one transaction. Returns false, and
    /// writes nothing, unless exactly one unexpired row owned by `user_id`
    /// matched `old`.
    async fn rotate(
        &self,
        old: &str,
        user_id: Uuid,
        new: &str,
        expires_at: OffsetDateTime,
    ) -> AppResult<bool>;

    async fn revoke(&self, token: &str) -> AppResult<u64>;
    async fn purge_expired(&self, user_id: Uuid) -> AppResult<u64>;
}

#[async_trait]
impl UserRepo for PgStore {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, name, role, phone, avatar, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, name, role, phone, avatar, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn create(&self, new: NewUser) -> AppResult<User> {
        let mut tx = self.db.begin().await?;
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, password_hash, name, role, phone)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, email, password_hash, name, role, phone, avatar, created_at, updated_at
            "#,
        )
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(&new.name)
        .bind(new.role)
        .bind(&new.phone)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(doctor_id) = new.doctor_id {
            sqlx::query(
                r#"
                INSERT INTO doctor_patients (doctor_id, patient_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(doctor_id)
            .bind(user.id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(user)
    }

    async fn update(&self, id: Uuid, changes: UserChanges) -> AppResult<User> {
        let UserChanges {
            email,
            name,
            phone,
            password_hash,
            avatar,
        } = changes;
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET
                email = COALESCE($2, email),
                name = COALESCE($3, name),
                phone = CASE WHEN $4 THEN $5 ELSE phone END,
                password_hash = COALESCE($6, password_hash),
                avatar = CASE WHEN $7 THEN $8 ELSE avatar END,
                updated_at = now()
            WHERE id = $1
            RETURNING id, email, password_hash, name, role, phone, avatar, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(email)
        .bind(name)
        .bind(phone.is_some())
        .bind(phone.flatten())
        .bind(password_hash)
        .bind(avatar.is_some())
        .bind(avatar.flatten())
        .fetch_optional(&self.db)
        .await?;
        user.ok_or_else(|| AppError::not_found("User not found"))
    }

    async fn delete(&self, id: Uuid) -> AppResult<()> {
        let deleted = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(AppError::not_found("User not found"));
        }
        Ok(())
    }
}

#[async_trait]
impl TokenRepo for PgStore {
    async fn insert(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> AppResult<RefreshToken> {
        let row = sqlx::query_as::<_, RefreshToken>(
            r#"
            INSERT INTO refresh_tokens (token, user_id, expires_at)
            VALUES ($1, $2, $3)
            RETURNING id, token, user_id, expires_at, created_at
            "#,
        )
        .bind(token)
        .bind(user_id)
        .bind(expires_at)
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }

    async fn rotate(
        &self,
        old: &str,
        user_id: Uuid,
        new: &str,
        expires_at: OffsetDateTime,
    ) -> AppResult<bool> {
        let mut tx = self.db.begin().await?;
        // A concurrent rotation of the same token blocks on the row lock and
        // then sees zero affected rows.
        let consumed = sqlx::query(
            r#"
            DELETE FROM refresh_tokens
            WHERE token = $1 AND user_id = $2 AND expires_at > now()
            "#,
        )
        .bind(old)
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if consumed != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (token, user_id, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(new)
        .bind(user_id)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn revoke(&self, token: &str) -> AppResult<u64> {
        let n = sqlx::query("DELETE FROM refresh_tokens WHERE token = $1")
            .bind(token)
            .execute(&self.db)
            .await?
            .rows_affected();
        Ok(n)
    }

    async fn purge_expired(&self, user_id: Uuid) -> AppResult<u64> {
        let n = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1 AND expires_at < now()")
            .bind(user_id)
            .execute(&self.db)
            .await?
            .rows_affected();
        Ok(n)
    }
}
