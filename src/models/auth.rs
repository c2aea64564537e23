use std::{collections::BTreeSet, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Capability attached to a principal. Each variant corresponds to one role
/// name in the `roles` table; the wire form is the role name behind `ROLE_`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Authority {
    #[serde(rename = "ROLE_ADMIN")]
    Admin,
    #[serde(rename = "ROLE_USER")]
    User,
}

impl Authority {
    pub const PREFIX: &'static str = "ROLE_";

    pub fn role_name(self) -> &'static str {
        match self {
            Authority::Admin => "ADMIN",
            Authority::User => "USER",
        }
    }

    /// Maps a stored role name to its authority. Unknown names yield `None`.
    pub fn from_role_name(name: &str) -> Option<Self> {
        match name {
            "ADMIN" => Some(Authority::Admin),
            "USER" => Some(Authority::User),
            _ => None,
        }
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.role_name())
    }
}

impl FromStr for Authority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix(Self::PREFIX)
            .and_then(Self::from_role_name)
            .ok_or_else(|| anyhow::anyhow!("Unknown authority: {s}"))
    }
}

/// Claims embedded in the JWT access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user email
    pub roles: Vec<Authority>,
    pub iat: usize,
    pub exp: usize,
}

/// The caller of a request, reconstructed from a validated access token.
/// Passed explicitly into every core operation that acts on behalf of a user.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub email: String,
    pub authorities: BTreeSet<Authority>,
}

impl AuthenticatedUser {
    pub fn has_authority(&self, authority: Authority) -> bool {
        self.authorities.contains(&authority)
    }
}

/// Server-side record of an opaque refresh token. Only the SHA-256 digest of
/// the token string is stored.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RefreshToken {
    pub token_hash: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Response shared by login, register and refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub expires_at: DateTime<Utc>,
    pub access_token: String,
    pub refresh_token: String,
}
