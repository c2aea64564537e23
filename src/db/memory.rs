//! In-process store used when no database is configured and by the tests.
//!
//! Identities are held as sealed [`UserRow`]s, so the field cipher sits on
//! the same path as with Postgres.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    db::store::{RefreshTokenStore, RoleAssignmentStore, RoleStore, UserStore},
    error::{AuthError, AuthResult},
    models::{
        auth::RefreshToken,
        role::{Role, RoleAssignment},
        user::{User, UserRow},
    },
    services::{encryption::FieldCipher, lockout::merge_lock},
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, UserRow>,
    roles: HashMap<Uuid, Role>,
    role_assignments: HashMap<(Uuid, Uuid), RoleAssignment>,
    refresh_tokens: HashMap<String, RefreshToken>,
}

pub struct MemoryStore {
    cipher: Arc<FieldCipher>,
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Creates an empty store seeded with the `ADMIN` and `USER` roles.
    pub fn new(cipher: Arc<FieldCipher>) -> Self {
        let mut tables = Tables::default();
        for name in ["ADMIN", "USER"] {
            let role = Role {
                id: Uuid::new_v4(),
                name: name.to_string(),
                created_at: Utc::now(),
            };
            tables.roles.insert(role.id, role);
        }
        Self {
            cipher,
            tables: Mutex::new(tables),
        }
    }

    /// Adds a role row. Used to model roles outside the known authority set.
    pub async fn insert_role(&self, name: &str) -> Role {
        let role = Role {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.tables.lock().await.roles.insert(role.id, role.clone());
        role
    }

    pub async fn remove_role(&self, id: Uuid) {
        self.tables.lock().await.roles.remove(&id);
    }

    /// Overwrites a stored identity without any lockout guard.
    pub async fn put_user(&self, user: &User) -> AuthResult<()> {
        let row = UserRow::seal(user, &self.cipher)?;
        self.tables.lock().await.users.insert(row.id, row);
        Ok(())
    }

    /// Raw sealed row, as it would sit on disk.
    pub async fn user_row(&self, id: Uuid) -> Option<UserRow> {
        self.tables.lock().await.users.get(&id).cloned()
    }

    pub async fn refresh_token_count(&self) -> usize {
        self.tables.lock().await.refresh_tokens.len()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<User>> {
        let row = self.tables.lock().await.users.get(&id).cloned();
        row.map(|r| r.open(&self.cipher)).transpose()
    }

    async fn find_by_email(&self, email: &str) -> AuthResult<Option<User>> {
        let index = self.cipher.blind_index(email);
        let row = self
            .tables
            .lock()
            .await
            .users
            .values()
            .find(|r| r.email_index == index)
            .cloned();
        row.map(|r| r.open(&self.cipher)).transpose()
    }

    async fn exists_by_email(&self, email: &str) -> AuthResult<bool> {
        let index = self.cipher.blind_index(email);
        Ok(self
            .tables
            .lock()
            .await
            .users
            .values()
            .any(|r| r.email_index == index))
    }

    async fn find_all(&self) -> AuthResult<Vec<User>> {
        let mut rows: Vec<UserRow> = self.tables.lock().await.users.values().cloned().collect();
        rows.sort_by_key(|r| r.registered_at);
        rows.into_iter().map(|r| r.open(&self.cipher)).collect()
    }

    async fn insert(&self, user: &User) -> AuthResult<()> {
        let row = UserRow::seal(user, &self.cipher)?;
        let mut tables = self.tables.lock().await;
        if tables.users.values().any(|r| r.email_index == row.email_index) {
            return Err(AuthError::EmailTaken);
        }
        tables.users.insert(row.id, row);
        Ok(())
    }

    async fn save_login_state(&self, user: &User) -> AuthResult<()> {
        let mut tables = self.tables.lock().await;
        let row = tables.users.get_mut(&user.id).ok_or(AuthError::UserNotFound)?;
        row.failed_login_attempts = user.failed_login_attempts;
        row.last_failed_login_at = user.last_failed_login_at;
        row.locked_until = merge_lock(row.locked_until, user.locked_until, Utc::now());
        Ok(())
    }
}

#[async_trait]
impl RoleStore for MemoryStore {
    async fn find_by_name(&self, name: &str) -> AuthResult<Option<Role>> {
        Ok(self
            .tables
            .lock()
            .await
            .roles
            .values()
            .find(|r| r.name == name)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<Role>> {
        Ok(self.tables.lock().await.roles.get(&id).cloned())
    }
}

#[async_trait]
impl RoleAssignmentStore for MemoryStore {
    async fn find_by_user_id(&self, user_id: Uuid) -> AuthResult<Vec<RoleAssignment>> {
        Ok(self
            .tables
            .lock()
            .await
            .role_assignments
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn save(&self, assignment: &RoleAssignment) -> AuthResult<()> {
        self.tables
            .lock()
            .await
            .role_assignments
            .entry((assignment.user_id, assignment.role_id))
            .or_insert_with(|| assignment.clone());
        Ok(())
    }

    async fn exists(&self, user_id: Uuid, role_id: Uuid) -> AuthResult<bool> {
        Ok(self
            .tables
            .lock()
            .await
            .role_assignments
            .contains_key(&(user_id, role_id)))
    }

    async fn delete(&self, user_id: Uuid, role_id: Uuid) -> AuthResult<bool> {
        Ok(self
            .tables
            .lock()
            .await
            .role_assignments
            .remove(&(user_id, role_id))
            .is_some())
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn save(&self, token: &RefreshToken) -> AuthResult<()> {
        self.tables
            .lock()
            .await
            .refresh_tokens
            .insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> AuthResult<Option<RefreshToken>> {
        Ok(self.tables.lock().await.refresh_tokens.get(token_hash).cloned())
    }

    async fn delete(&self, token_hash: &str) -> AuthResult<bool> {
        Ok(self
            .tables
            .lock()
            .await
            .refresh_tokens
            .remove(token_hash)
            .is_some())
    }

    async fn delete_by_user(&self, user_id: Uuid) -> AuthResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.refresh_tokens.len();
        tables.refresh_tokens.retain(|_, t| t.user_id != user_id);
        Ok((before - tables.refresh_tokens.len()) as u64)
    }

    async fn find_all_expired_before(&self, now: DateTime<Utc>) -> AuthResult<Vec<RefreshToken>> {
        Ok(self
            .tables
            .lock()
            .await
            .refresh_tokens
            .values()
            .filter(|t| t.expires_at < now)
            .cloned()
            .collect())
    }
}
