//! Access-token issuer and validator.
//!
//! Access tokens are HS256 JWTs carrying the user's email as subject and the
//! role-derived authorities. They are never stored: validity is recomputed
//! from signature and expiry on every use, so a live token cannot be revoked
//! before it expires.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::{
    error::{AuthError, AuthResult},
    models::auth::{AuthenticatedUser, Authority, Claims},
};

pub const ACCESS_TOKEN_TTL_SECONDS: i64 = 3600;

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &str) -> Self {
        Self::with_ttl(secret, Duration::seconds(ACCESS_TOKEN_TTL_SECONDS))
    }

    pub(crate) fn with_ttl(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn generate_token(
        &self,
        subject: &str,
        authorities: &BTreeSet<Authority>,
    ) -> AuthResult<IssuedToken> {
        let issued_at = Utc::now();
        let expires_at = issued_at + self.ttl;
        let claims = Claims {
            sub: subject.to_string(),
            roles: authorities.iter().copied().collect(),
            iat: issued_at.timestamp().max(0) as usize,
            exp: expires_at.timestamp().max(0) as usize,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("token signing failed: {e}")))?;
        Ok(IssuedToken { token, expires_at })
    }

    /// Returns the subject of a well-signed token, expired or not.
    pub fn extract_subject(&self, token: &str) -> AuthResult<String> {
        Ok(self.claims(token, false)?.sub)
    }

    /// True iff the signature verifies, the subject matches and the token has
    /// not expired. Never returns an error.
    pub fn is_valid(&self, token: &str, expected_subject: &str) -> bool {
        match self.claims(token, false) {
            Ok(claims) => {
                claims.sub == expected_subject && Utc::now().timestamp() < claims.exp as i64
            }
            Err(_) => false,
        }
    }

    /// Validates a bearer token and rebuilds the caller's principal from it.
    pub fn authenticate(&self, token: &str) -> AuthResult<AuthenticatedUser> {
        let claims = self.claims(token, true)?;
        Ok(AuthenticatedUser {
            email: claims.sub,
            authorities: claims.roles.into_iter().collect(),
        })
    }

    fn claims(&self, token: &str, validate_exp: bool) -> AuthResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = validate_exp;
        validation.leeway = 0;

        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|_| AuthError::InvalidToken)
    }
}
