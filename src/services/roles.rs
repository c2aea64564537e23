use std::{collections::BTreeSet, sync::Arc};

use uuid::Uuid;

use crate::{
    db::store::{RoleAssignmentStore, RoleStore, Stores, UserStore},
    error::{AuthError, AuthResult},
    models::{
        auth::{AuthenticatedUser, Authority},
        role::{Role, RoleAssignment},
        user::User,
    },
    services::access::AccessValidator,
};

/// Maps a user's role assignments to authorities. Read-only, so it can be
/// called as often as a request needs.
pub struct RoleResolver {
    roles: Arc<dyn RoleStore>,
    role_assignments: Arc<dyn RoleAssignmentStore>,
}

impl RoleResolver {
    pub fn new(roles: Arc<dyn RoleStore>, role_assignments: Arc<dyn RoleAssignmentStore>) -> Self {
        Self {
            roles,
            role_assignments,
        }
    }

    pub async fn authorities_for(&self, user_id: Uuid) -> AuthResult<BTreeSet<Authority>> {
        let mut authorities = BTreeSet::new();
        for assignment in self.role_assignments.find_by_user_id(user_id).await? {
            // Assignments pointing at a role that no longer exists are skipped.
            let Some(role) = self.roles.find_by_id(assignment.role_id).await? else {
                continue;
            };
            match Authority::from_role_name(&role.name) {
                Some(authority) => {
                    authorities.insert(authority);
                }
                None => tracing::warn!("Ignoring unknown role '{}' on user {}", role.name, user_id),
            }
        }
        Ok(authorities)
    }

    pub async fn has_authority(&self, user_id: Uuid, authority: Authority) -> AuthResult<bool> {
        Ok(self.authorities_for(user_id).await?.contains(&authority))
    }
}

/// Assigning a role twice leaves a single assignment and is not an error.
pub async fn assign(
    role_assignments: &dyn RoleAssignmentStore,
    user_id: Uuid,
    role: &Role,
) -> AuthResult<bool> {
    if role_assignments.exists(user_id, role.id).await? {
        return Ok(false);
    }
    role_assignments.save(&RoleAssignment::new(user_id, role.id)).await?;
    Ok(true)
}

/// Role administration on behalf of an admin caller.
pub struct RoleService {
    users: Arc<dyn UserStore>,
    roles: Arc<dyn RoleStore>,
    role_assignments: Arc<dyn RoleAssignmentStore>,
    access: Arc<AccessValidator>,
}

impl RoleService {
    pub fn new(stores: &Stores, access: Arc<AccessValidator>) -> Self {
        Self {
            users: stores.users.clone(),
            roles: stores.roles.clone(),
            role_assignments: stores.role_assignments.clone(),
            access,
        }
    }

    pub async fn assign_role(
        &self,
        editor: &AuthenticatedUser,
        email: &str,
        role_name: &str,
    ) -> AuthResult<User> {
        let editor = self.access.require_admin(editor).await?;
        let (target, role) = self.target_and_role(email, role_name).await?;

        if assign(self.role_assignments.as_ref(), target.id, &role).await? {
            tracing::info!("Role '{}' assigned to user {} by {}", role.name, target.id, editor.id);
        } else {
            tracing::info!("User {} already has role '{}'", target.id, role.name);
        }
        Ok(target)
    }

    pub async fn remove_role(
        &self,
        editor: &AuthenticatedUser,
        email: &str,
        role_name: &str,
    ) -> AuthResult<User> {
        let editor = self.access.require_admin(editor).await?;
        let (target, role) = self.target_and_role(email, role_name).await?;

        if self.role_assignments.delete(target.id, role.id).await? {
            tracing::info!("Role '{}' removed from user {} by {}", role.name, target.id, editor.id);
        }
        Ok(target)
    }

    async fn target_and_role(&self, email: &str, role_name: &str) -> AuthResult<(User, Role)> {
        let target = self
            .users
            .find_by_email(email)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        let role = self
            .roles
            .find_by_name(role_name)
            .await?
            .ok_or_else(|| AuthError::RoleNotFound(role_name.to_string()))?;
        Ok((target, role))
    }
}
