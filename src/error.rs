//! Error type shared by the auth core and the HTTP layer.
//!
//! Every failure the core can report maps to exactly one variant; the
//! `IntoResponse` impl is the single place where kinds become status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

/// Field encryption failures. Always fatal to the surrounding operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed")]
    DecryptionFailed,
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// Wrong password, or an unknown email folded in to avoid user enumeration.
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// `until` is `None` for an administrative lock without expiry.
    #[error("Account is locked")]
    AccountLocked { until: Option<DateTime<Utc>> },

    #[error("Account is disabled or expired")]
    AccountDisabled,

    #[error("Email is already taken")]
    EmailTaken,

    #[error("Invalid or expired refresh token")]
    InvalidRefreshToken,

    #[error("Invalid or expired access token")]
    InvalidToken,

    #[error("No authenticated user found")]
    NotAuthenticated,

    #[error("User not found")]
    UserNotFound,

    #[error("Role {0} not found")]
    RoleNotFound(String),

    #[error("Access denied")]
    AccessDenied,

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials
            | AuthError::InvalidRefreshToken
            | AuthError::InvalidToken
            | AuthError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            AuthError::AccountLocked { .. } => StatusCode::LOCKED,
            AuthError::AccountDisabled | AuthError::AccessDenied => StatusCode::FORBIDDEN,
            AuthError::EmailTaken => StatusCode::CONFLICT,
            AuthError::UserNotFound | AuthError::RoleNotFound(_) => StatusCode::NOT_FOUND,
            AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::Cipher(_) | AuthError::Database(_) | AuthError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn log(&self) {
        match self {
            AuthError::Database(e) => tracing::error!(error = %e, "Auth database error"),
            AuthError::Cipher(e) => tracing::error!(error = %e, "Field cipher failure"),
            AuthError::Internal(msg) => tracing::error!(message = %msg, "Auth internal error"),
            AuthError::AccessDenied => tracing::warn!("Access denied"),
            _ => tracing::debug!(error = %self, "Auth error"),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.status_code();
        let body = match &self {
            AuthError::AccountLocked { until } => json!({
                "error": self.to_string(),
                "locked_until": until,
            }),
            // Internal detail stays in the server log.
            _ if status == StatusCode::INTERNAL_SERVER_ERROR => {
                json!({ "error": "Internal server error" })
            }
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_per_kind() {
        assert_eq!(AuthError::InvalidCredentials.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::AccountLocked { until: None }.status_code(),
            StatusCode::LOCKED
        );
        assert_eq!(AuthError::EmailTaken.status_code(), StatusCode::CONFLICT);
        assert_eq!(AuthError::InvalidRefreshToken.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::AccessDenied.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::UserNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            AuthError::from(CipherError::DecryptionFailed).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_internal_errors_do_not_leak_detail() {
        let response = AuthError::Internal("pool exhausted".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Internal server error");
    }
}
