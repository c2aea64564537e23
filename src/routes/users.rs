use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::{
    db::store::UserStore,
    error::{AuthError, AuthResult},
    models::{
        auth::AuthenticatedUser,
        role::RoleChangeRequest,
        user::UserProfile,
    },
    services::access::AccessTarget,
    AppState,
};

/// Admin only.
pub async fn list_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AuthResult<Json<Vec<UserProfile>>> {
    state.access.require_admin(&user).await?;
    let users = state.users.find_all().await?;
    Ok(Json(users.into_iter().map(UserProfile::from).collect()))
}

/// Profile of the caller.
pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AuthResult<Json<UserProfile>> {
    let current = state.access.current_user(&user).await?;
    Ok(Json(current.into()))
}

pub async fn get_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AuthResult<Json<UserProfile>> {
    state
        .access
        .validate_user_access(&user, AccessTarget::Id(id))
        .await?;
    let target = state
        .users
        .find_by_id(id)
        .await?
        .ok_or(AuthError::UserNotFound)?;
    Ok(Json(target.into()))
}

pub async fn get_user_by_email(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(email): Path<String>,
) -> AuthResult<Json<UserProfile>> {
    state
        .access
        .validate_user_access(&user, AccessTarget::Email(&email))
        .await?;
    let target = state
        .users
        .find_by_email(&email)
        .await?
        .ok_or(AuthError::UserNotFound)?;
    Ok(Json(target.into()))
}

/// Admin only.
pub async fn assign_role(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<RoleChangeRequest>,
) -> AuthResult<Json<UserProfile>> {
    let target = state
        .roles
        .assign_role(&user, &body.email, &body.role_name)
        .await?;
    Ok(Json(target.into()))
}

/// Admin only.
pub async fn remove_role(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<RoleChangeRequest>,
) -> AuthResult<Json<UserProfile>> {
    let target = state
        .roles
        .remove_role(&user, &body.email, &body.role_name)
        .await?;
    Ok(Json(target.into()))
}
