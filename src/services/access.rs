use std::sync::Arc;

use uuid::Uuid;

use crate::{
    db::store::UserStore,
    error::{AuthError, AuthResult},
    models::{
        auth::{AuthenticatedUser, Authority},
        user::User,
    },
    services::roles::RoleResolver,
};

/// Resource whose owner is compared against the caller.
#[derive(Debug, Clone, Copy)]
pub enum AccessTarget<'a> {
    Id(Uuid),
    Email(&'a str),
}

/// Admin-or-owner checks. Admin status is recomputed from the current role
/// assignments rather than trusted from the token.
pub struct AccessValidator {
    users: Arc<dyn UserStore>,
    resolver: Arc<RoleResolver>,
}

impl AccessValidator {
    pub fn new(users: Arc<dyn UserStore>, resolver: Arc<RoleResolver>) -> Self {
        Self { users, resolver }
    }

    pub async fn current_user(&self, principal: &AuthenticatedUser) -> AuthResult<User> {
        self.users
            .find_by_email(&principal.email)
            .await?
            .ok_or(AuthError::AccessDenied)
    }

    pub async fn is_admin_or_self(
        &self,
        principal: &AuthenticatedUser,
        target: AccessTarget<'_>,
    ) -> AuthResult<bool> {
        let current = self.current_user(principal).await?;
        let target_id = match target {
            AccessTarget::Id(id) => id,
            AccessTarget::Email(email) => {
                self.users
                    .find_by_email(email)
                    .await?
                    .ok_or(AuthError::AccessDenied)?
                    .id
            }
        };
        if current.id == target_id {
            return Ok(true);
        }
        self.resolver.has_authority(current.id, Authority::Admin).await
    }

    pub async fn validate_user_access(
        &self,
        principal: &AuthenticatedUser,
        target: AccessTarget<'_>,
    ) -> AuthResult<()> {
        if self.is_admin_or_self(principal, target).await? {
            Ok(())
        } else {
            Err(AuthError::AccessDenied)
        }
    }

    /// Returns the caller's identity if it currently holds `ROLE_ADMIN`.
    pub async fn require_admin(&self, principal: &AuthenticatedUser) -> AuthResult<User> {
        let current = self.current_user(principal).await?;
        if self.resolver.has_authority(current.id, Authority::Admin).await? {
            Ok(current)
        } else {
            Err(AuthError::AccessDenied)
        }
    }
}
