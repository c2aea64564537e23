use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    error::{AuthError, AuthResult},
    services::encryption::FieldCipher,
};

/// Identity as the core sees it: email in clear, password as a bcrypt hash.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
    pub registered_at: DateTime<Utc>,
    pub enabled: bool,
    pub account_non_expired: bool,
    pub account_non_locked: bool,
    pub credentials_non_expired: bool,
    pub failed_login_attempts: i32,
    pub last_failed_login_at: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(first_name: &str, last_name: &str, email: &str, password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.trim().to_string(),
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
            password_hash,
            registered_at: Utc::now(),
            enabled: true,
            account_non_expired: true,
            account_non_locked: true,
            credentials_non_expired: true,
            failed_login_attempts: 0,
            last_failed_login_at: None,
            locked_until: None,
        }
    }
}

/// DB row struct. The email only exists as ciphertext plus a keyed blind index.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email_ciphertext: String,
    pub email_index: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
    pub registered_at: DateTime<Utc>,
    pub enabled: bool,
    pub account_non_expired: bool,
    pub account_non_locked: bool,
    pub credentials_non_expired: bool,
    pub failed_login_attempts: i32,
    pub last_failed_login_at: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,
}

impl UserRow {
    pub fn seal(user: &User, cipher: &FieldCipher) -> AuthResult<Self> {
        Ok(Self {
            id: user.id,
            email_ciphertext: cipher.encrypt(&user.email)?,
            email_index: cipher.blind_index(&user.email),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            password_hash: user.password_hash.clone(),
            registered_at: user.registered_at,
            enabled: user.enabled,
            account_non_expired: user.account_non_expired,
            account_non_locked: user.account_non_locked,
            credentials_non_expired: user.credentials_non_expired,
            failed_login_attempts: user.failed_login_attempts,
            last_failed_login_at: user.last_failed_login_at,
            locked_until: user.locked_until,
        })
    }

    pub fn open(self, cipher: &FieldCipher) -> AuthResult<User> {
        Ok(User {
            id: self.id,
            email: cipher.decrypt(&self.email_ciphertext)?,
            first_name: self.first_name,
            last_name: self.last_name,
            password_hash: self.password_hash,
            registered_at: self.registered_at,
            enabled: self.enabled,
            account_non_expired: self.account_non_expired,
            account_non_locked: self.account_non_locked,
            credentials_non_expired: self.credentials_non_expired,
            failed_login_attempts: self.failed_login_attempts,
            last_failed_login_at: self.last_failed_login_at,
            locked_until: self.locked_until,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub registered_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            first_name: u.first_name,
            last_name: u.last_name,
            email: u.email,
            registered_at: u.registered_at,
        }
    }
}

// Request DTOs
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

impl RegisterRequest {
    /// Rejects blank fields and emails without a local part and a domain.
    pub fn validate(&self) -> AuthResult<()> {
        for (field, value) in [
            ("first_name", &self.first_name),
            ("last_name", &self.last_name),
            ("email", &self.email),
            ("password", &self.password),
        ] {
            if value.trim().is_empty() {
                return Err(AuthError::Validation(format!("{field}: must not be blank")));
            }
        }
        match self.email.trim().split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
            _ => Err(AuthError::Validation("email: must be a well-formed email address".into())),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}
