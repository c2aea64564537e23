use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Role given to every newly registered user.
pub const DEFAULT_ROLE: &str = "USER";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Join row between a user and a role; (user_id, role_id) is the key.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RoleAssignment {
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub assigned_at: DateTime<Utc>,
}

impl RoleAssignment {
    pub fn new(user_id: Uuid, role_id: Uuid) -> Self {
        Self {
            user_id,
            role_id,
            assigned_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RoleChangeRequest {
    pub email: String,
    pub role_name: String,
}
