use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    db::store::{RefreshTokenStore, RoleAssignmentStore, RoleStore, UserStore},
    error::{AuthError, AuthResult},
    models::{
        auth::RefreshToken,
        role::{Role, RoleAssignment},
        user::{User, UserRow},
    },
    services::encryption::FieldCipher,
};

const USER_COLUMNS: &str = "id, email_ciphertext, email_index, first_name, last_name, password_hash,
    registered_at, enabled, account_non_expired, account_non_locked, credentials_non_expired,
    failed_login_attempts, last_failed_login_at, locked_until";

pub struct PgStore {
    pool: PgPool,
    cipher: Arc<FieldCipher>,
}

impl PgStore {
    pub fn new(pool: PgPool, cipher: Arc<FieldCipher>) -> Self {
        Self { pool, cipher }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|r| r.open(&self.cipher)).transpose()
    }

    async fn find_by_email(&self, email: &str) -> AuthResult<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE email_index = $1"))
                .bind(self.cipher.blind_index(email))
                .fetch_optional(&self.pool)
                .await?;
        row.map(|r| r.open(&self.cipher)).transpose()
    }

    async fn exists_by_email(&self, email: &str) -> AuthResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email_index = $1)")
                .bind(self.cipher.blind_index(email))
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn find_all(&self) -> AuthResult<Vec<User>> {
        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY registered_at, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|r| r.open(&self.cipher)).collect()
    }

    async fn insert(&self, user: &User) -> AuthResult<()> {
        let row = UserRow::seal(user, &self.cipher)?;
        sqlx::query(&format!(
            "INSERT INTO users ({USER_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        ))
        .bind(row.id)
        .bind(&row.email_ciphertext)
        .bind(&row.email_index)
        .bind(&row.first_name)
        .bind(&row.last_name)
        .bind(&row.password_hash)
        .bind(row.registered_at)
        .bind(row.enabled)
        .bind(row.account_non_expired)
        .bind(row.account_non_locked)
        .bind(row.credentials_non_expired)
        .bind(row.failed_login_attempts)
        .bind(row.last_failed_login_at)
        .bind(row.locked_until)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AuthError::EmailTaken
            } else {
                AuthError::Database(e)
            }
        })?;
        Ok(())
    }

    async fn save_login_state(&self, user: &User) -> AuthResult<()> {
        // Same rule as lockout::merge_lock, evaluated against the row as stored.
        sqlx::query(
            "UPDATE users SET
                failed_login_attempts = $2,
                last_failed_login_at = $3,
                locked_until = CASE
                    WHEN locked_until IS NOT NULL AND locked_until > NOW()
                         AND ($4::TIMESTAMPTZ IS NULL OR $4::TIMESTAMPTZ < locked_until)
                    THEN locked_until
                    ELSE $4::TIMESTAMPTZ
                END
             WHERE id = $1",
        )
        .bind(user.id)
        .bind(user.failed_login_attempts)
        .bind(user.last_failed_login_at)
        .bind(user.locked_until)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RoleStore for PgStore {
    async fn find_by_name(&self, name: &str) -> AuthResult<Option<Role>> {
        let role = sqlx::query_as("SELECT id, name, created_at FROM roles WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(role)
    }

    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<Role>> {
        let role = sqlx::query_as("SELECT id, name, created_at FROM roles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(role)
    }
}

#[async_trait]
impl RoleAssignmentStore for PgStore {
    async fn find_by_user_id(&self, user_id: Uuid) -> AuthResult<Vec<RoleAssignment>> {
        let rows = sqlx::query_as(
            "SELECT user_id, role_id, assigned_at FROM user_roles WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn save(&self, assignment: &RoleAssignment) -> AuthResult<()> {
        sqlx::query(
            "INSERT INTO user_roles (user_id, role_id, assigned_at) VALUES ($1, $2, $3)
             ON CONFLICT (user_id, role_id) DO NOTHING",
        )
        .bind(assignment.user_id)
        .bind(assignment.role_id)
        .bind(assignment.assigned_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn exists(&self, user_id: Uuid, role_id: Uuid) -> AuthResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM user_roles WHERE user_id = $1 AND role_id = $2)",
        )
        .bind(user_id)
        .bind(role_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn delete(&self, user_id: Uuid, role_id: Uuid) -> AuthResult<bool> {
        let result = sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2")
            .bind(user_id)
            .bind(role_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl RefreshTokenStore for PgStore {
    async fn save(&self, token: &RefreshToken) -> AuthResult<()> {
        sqlx::query(
            "INSERT INTO refresh_tokens (token_hash, user_id, expires_at, created_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&token.token_hash)
        .bind(token.user_id)
        .bind(token.expires_at)
        .bind(token.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> AuthResult<Option<RefreshToken>> {
        let token = sqlx::query_as(
            "SELECT token_hash, user_id, expires_at, created_at
             FROM refresh_tokens WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(token)
    }

    async fn delete(&self, token_hash: &str) -> AuthResult<bool> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_by_user(&self, user_id: Uuid) -> AuthResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn find_all_expired_before(&self, now: DateTime<Utc>) -> AuthResult<Vec<RefreshToken>> {
        let rows = sqlx::query_as(
            "SELECT token_hash, user_id, expires_at, created_at
             FROM refresh_tokens WHERE expires_at < $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
