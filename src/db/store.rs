//! Store traits consumed by the auth core.
//!
//! Implementations must make each method atomic for a single row; the core
//! relies on that for lockout monotonicity and single-use refresh tokens.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::AuthResult,
    models::{
        auth::RefreshToken,
        role::{Role, RoleAssignment},
        user::User,
    },
};

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<User>>;

    /// Case-insensitive lookup.
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<User>>;

    async fn exists_by_email(&self, email: &str) -> AuthResult<bool>;

    /// Every identity, oldest registration first.
    async fn find_all(&self) -> AuthResult<Vec<User>>;

    /// Inserts a new identity. Fails with `EmailTaken` if the email is in use.
    async fn insert(&self, user: &User) -> AuthResult<()>;

    /// Persists the lockout fields of `user`.
    ///
    /// An active lock already stored is never shortened or cleared by this
    /// call; see [`crate::services::lockout::merge_lock`].
    async fn save_login_state(&self, user: &User) -> AuthResult<()>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn find_by_name(&self, name: &str) -> AuthResult<Option<Role>>;

    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<Role>>;
}

#[async_trait]
pub trait RoleAssignmentStore: Send + Sync {
    async fn find_by_user_id(&self, user_id: Uuid) -> AuthResult<Vec<RoleAssignment>>;

    /// Idempotent: saving an existing (user, role) pair is a no-op.
    async fn save(&self, assignment: &RoleAssignment) -> AuthResult<()>;

    async fn exists(&self, user_id: Uuid, role_id: Uuid) -> AuthResult<bool>;

    /// Returns whether a row was removed.
    async fn delete(&self, user_id: Uuid, role_id: Uuid) -> AuthResult<bool>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn save(&self, token: &RefreshToken) -> AuthResult<()>;

    async fn find_by_token_hash(&self, token_hash: &str) -> AuthResult<Option<RefreshToken>>;

    /// Conditional delete: true only for the caller that actually removed the row.
    async fn delete(&self, token_hash: &str) -> AuthResult<bool>;

    async fn delete_by_user(&self, user_id: Uuid) -> AuthResult<u64>;

    async fn find_all_expired_before(&self, now: DateTime<Utc>) -> AuthResult<Vec<RefreshToken>>;
}

/// The set of stores the services are built from.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub roles: Arc<dyn RoleStore>,
    pub role_assignments: Arc<dyn RoleAssignmentStore>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
}

impl Stores {
    /// Uses one backend for every store.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: UserStore + RoleStore + RoleAssignmentStore + RefreshTokenStore + 'static,
    {
        Self {
            users: backend.clone(),
            roles: backend.clone(),
            role_assignments: backend.clone(),
            refresh_tokens: backend,
        }
    }
}
