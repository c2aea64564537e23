//! Opaque refresh tokens.
//!
//! Unlike access tokens these are server-tracked so they can be revoked and
//! used exactly once. Only the SHA-256 digest of a token is persisted.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    db::store::RefreshTokenStore,
    error::{AuthError, AuthResult},
    models::auth::RefreshToken,
};

pub const REFRESH_TOKEN_TTL_DAYS: i64 = 7;

/// 48 alphanumeric characters, ~285 bits of entropy.
const TOKEN_LENGTH: usize = 48;

#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub struct RefreshTokenService {
    tokens: Arc<dyn RefreshTokenStore>,
    ttl: Duration,
}

impl RefreshTokenService {
    pub fn new(tokens: Arc<dyn RefreshTokenStore>) -> Self {
        Self {
            tokens,
            ttl: Duration::days(REFRESH_TOKEN_TTL_DAYS),
        }
    }

    pub async fn create(&self, user_id: Uuid) -> AuthResult<IssuedRefreshToken> {
        let token: String = rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect();

        let now = Utc::now();
        let record = RefreshToken {
            token_hash: hash_token(&token),
            user_id,
            expires_at: now + self.ttl,
            created_at: now,
        };
        self.tokens.save(&record).await?;

        Ok(IssuedRefreshToken {
            token,
            expires_at: record.expires_at,
        })
    }

    /// Looks the token up and checks its expiry. A found-but-expired row is
    /// deleted on the way out. The valid row is left in place: the caller
    /// completes the rotation with [`Self::consume`].
    pub async fn validate_and_consume(&self, token: &str) -> AuthResult<RefreshToken> {
        let token_hash = hash_token(token);
        let record = self
            .tokens
            .find_by_token_hash(&token_hash)
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;

        if record.expires_at <= Utc::now() {
            self.tokens.delete(&token_hash).await?;
            tracing::warn!("Expired refresh token presented for user {}", record.user_id);
            return Err(AuthError::InvalidRefreshToken);
        }

        Ok(record)
    }

    /// Deletes a validated token. Of several callers racing on the same
    /// token, only the one whose delete removed the row succeeds.
    pub async fn consume(&self, record: &RefreshToken) -> AuthResult<()> {
        if self.tokens.delete(&record.token_hash).await? {
            Ok(())
        } else {
            tracing::warn!("Refresh token for user {} was already consumed", record.user_id);
            Err(AuthError::InvalidRefreshToken)
        }
    }

    pub async fn revoke_all(&self, user_id: Uuid) -> AuthResult<u64> {
        self.tokens.delete_by_user(user_id).await
    }

    /// Removes every expired token. Safe to run concurrently and repeatedly;
    /// returns how many rows this call removed.
    pub async fn sweep_expired(&self) -> AuthResult<u64> {
        let expired = self.tokens.find_all_expired_before(Utc::now()).await?;
        let mut removed = 0;
        for record in &expired {
            if self.tokens.delete(&record.token_hash).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
