use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::{header, request::Parts},
};

use crate::{
    error::AuthError,
    models::auth::AuthenticatedUser,
    services::token::TokenService,
};

/// Resolves the bearer principal from a validated access token. The token is
/// checked locally (signature and expiry); no store is consulted.
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?.ok_or(AuthError::NotAuthenticated)?;
        authenticate(parts, token)
    }
}

/// Anonymous callers get `None`; a malformed or expired token is still
/// rejected.
impl<S> OptionalFromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        match bearer_token(parts)? {
            Some(token) => authenticate(parts, token).map(Some),
            None => Ok(None),
        }
    }
}

fn bearer_token(parts: &Parts) -> Result<Option<String>, AuthError> {
    let Some(value) = parts.headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let token = value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::InvalidToken)?;
    Ok(Some(token.to_string()))
}

fn authenticate(parts: &Parts, token: String) -> Result<AuthenticatedUser, AuthError> {
    let tokens = parts
        .extensions
        .get::<Arc<TokenService>>()
        .ok_or_else(|| AuthError::Internal("token service not configured".into()))?;
    tokens.authenticate(&token)
}
