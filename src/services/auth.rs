use std::sync::Arc;

use crate::{
    db::store::{RoleAssignmentStore, RoleStore, Stores, UserStore},
    error::{AuthError, AuthResult},
    models::{
        auth::{AuthenticatedUser, TokenPair},
        role::DEFAULT_ROLE,
        user::{RegisterRequest, User},
    },
    services::{
        lockout::LockoutPolicy,
        metrics::{login_status, LOGINS_COUNTER, REFRESH_COUNTER, REGISTRATIONS_COUNTER},
        password::PasswordHasher,
        refresh::RefreshTokenService,
        roles::{self, RoleResolver},
        token::TokenService,
    },
};

/// Login, registration, refresh rotation and logout.
pub struct AuthService {
    users: Arc<dyn UserStore>,
    roles: Arc<dyn RoleStore>,
    role_assignments: Arc<dyn RoleAssignmentStore>,
    hasher: PasswordHasher,
    /// Verified against when the email is unknown, so both login failures
    /// cost one bcrypt verification.
    dummy_hash: String,
    lockout: LockoutPolicy,
    resolver: Arc<RoleResolver>,
    tokens: Arc<TokenService>,
    refresh_tokens: Arc<RefreshTokenService>,
}

impl AuthService {
    pub fn new(
        stores: &Stores,
        resolver: Arc<RoleResolver>,
        tokens: Arc<TokenService>,
        refresh_tokens: Arc<RefreshTokenService>,
        hasher: PasswordHasher,
    ) -> AuthResult<Self> {
        let dummy_hash = hasher.hash("library-api-dummy-password")?;
        Ok(Self {
            users: stores.users.clone(),
            roles: stores.roles.clone(),
            role_assignments: stores.role_assignments.clone(),
            hasher,
            dummy_hash,
            lockout: LockoutPolicy::new(stores.users.clone()),
            resolver,
            tokens,
            refresh_tokens,
        })
    }

    /// An unknown email and a wrong password both fail with
    /// `InvalidCredentials`. The lock is checked before the password, and
    /// only a confirmed mismatch counts as a failed attempt.
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<TokenPair> {
        let result = self.authenticate(email, password).await;
        LOGINS_COUNTER.with_label_values(&[login_status(&result)]).inc();
        result
    }

    async fn authenticate(&self, email: &str, password: &str) -> AuthResult<TokenPair> {
        let Some(mut user) = self.users.find_by_email(email).await? else {
            self.hasher.matches(password, &self.dummy_hash);
            return Err(AuthError::InvalidCredentials);
        };

        if LockoutPolicy::is_locked(&user) {
            tracing::warn!("Login attempt on locked account {}", user.id);
            return Err(AuthError::AccountLocked {
                until: user.locked_until,
            });
        }

        if !self.hasher.matches(password, &user.password_hash) {
            self.lockout.record_failed_attempt(&mut user).await?;
            return Err(AuthError::InvalidCredentials);
        }

        check_account_state(&user)?;
        self.lockout.reset(&mut user).await?;

        let pair = self.issue_token_pair(&user).await?;
        tracing::info!("User {} logged in", user.id);
        Ok(pair)
    }

    pub async fn register(&self, req: &RegisterRequest) -> AuthResult<TokenPair> {
        req.validate()?;
        if self.users.exists_by_email(&req.email).await? {
            return Err(AuthError::EmailTaken);
        }

        // Resolved first so a missing role cannot leave a role-less account behind.
        let role = self
            .roles
            .find_by_name(DEFAULT_ROLE)
            .await?
            .ok_or_else(|| AuthError::Internal(format!("default role {DEFAULT_ROLE} is missing")))?;

        let password_hash = self.hasher.hash(&req.password)?;
        let user = User::new(&req.first_name, &req.last_name, &req.email, password_hash);
        // A concurrent registration of the same email loses here with EmailTaken.
        self.users.insert(&user).await?;

        roles::assign(self.role_assignments.as_ref(), user.id, &role).await?;

        REGISTRATIONS_COUNTER.inc();
        tracing::info!("Registered user {}", user.id);
        self.issue_token_pair(&user).await
    }

    /// Full rotation: the presented token is deleted before a new pair is
    /// issued, so the same string can never be redeemed twice.
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        let result = self.rotate(refresh_token).await;
        let status = if result.is_ok() { "success" } else { "rejected" };
        REFRESH_COUNTER.with_label_values(&[status]).inc();
        result
    }

    async fn rotate(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        let record = self.refresh_tokens.validate_and_consume(refresh_token).await?;
        self.refresh_tokens.consume(&record).await?;

        let user = self
            .users
            .find_by_id(record.user_id)
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;
        check_account_state(&user)?;

        let pair = self.issue_token_pair(&user).await?;
        tracing::info!("Rotated refresh token for user {}", user.id);
        Ok(pair)
    }

    /// Revokes every refresh token of the caller. Access tokens already
    /// issued stay valid until they expire.
    pub async fn logout(&self, principal: Option<&AuthenticatedUser>) -> AuthResult<u64> {
        let principal = principal.ok_or(AuthError::NotAuthenticated)?;
        let user = self
            .users
            .find_by_email(&principal.email)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let revoked = self.refresh_tokens.revoke_all(user.id).await?;
        tracing::info!("User {} logged out, {} refresh token(s) revoked", user.id, revoked);
        Ok(revoked)
    }

    async fn issue_token_pair(&self, user: &User) -> AuthResult<TokenPair> {
        let authorities = self.resolver.authorities_for(user.id).await?;
        let access = self.tokens.generate_token(&user.email, &authorities)?;
        let refresh = self.refresh_tokens.create(user.id).await?;
        Ok(TokenPair {
            expires_at: access.expires_at,
            access_token: access.token,
            refresh_token: refresh.token,
        })
    }
}

/// Checked only once the password matched.
fn check_account_state(user: &User) -> AuthResult<()> {
    if !user.account_non_locked {
        return Err(AuthError::AccountLocked { until: None });
    }
    if !user.enabled || !user.account_non_expired || !user.credentials_non_expired {
        return Err(AuthError::AccountDisabled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use chrono::{Duration, Utc};

    use super::*;
    use crate::{
        db::store::UserStore,
        models::auth::Authority,
        services::lockout::MAX_FAILED_ATTEMPTS,
        test_support::{memory_state, memory_state_with, register_request, test_config},
    };

    const EMAIL: &str = "ann@example.com";
    const PASSWORD: &str = "Secr3t!A";

    #[tokio::test]
    async fn test_register_then_login() {
        let (state, _store) = memory_state();
        state.auth.register(&register_request(EMAIL, PASSWORD)).await.unwrap();

        let pair = state.auth.login(EMAIL, PASSWORD).await.unwrap();
        assert!(pair.expires_at > Utc::now());
        assert_eq!(state.tokens.extract_subject(&pair.access_token).unwrap(), EMAIL);
        assert!(state.tokens.is_valid(&pair.access_token, EMAIL));

        let principal = state.tokens.authenticate(&pair.access_token).unwrap();
        assert!(principal.has_authority(Authority::User));
        assert!(!principal.has_authority(Authority::Admin));
    }

    #[tokio::test]
    async fn test_login_is_case_insensitive_on_email() {
        let (state, _store) = memory_state();
        state.auth.register(&register_request(EMAIL, PASSWORD)).await.unwrap();

        let pair = state.auth.login("ANN@Example.COM", PASSWORD).await.unwrap();
        assert_eq!(state.tokens.extract_subject(&pair.access_token).unwrap(), EMAIL);
    }

    #[tokio::test]
    async fn test_email_is_encrypted_at_rest() {
        let (state, store) = memory_state();
        state.auth.register(&register_request(EMAIL, PASSWORD)).await.unwrap();
        let user = state.users.find_by_email(EMAIL).await.unwrap().unwrap();

        let row = store.user_row(user.id).await.unwrap();
        assert!(!row.email_ciphertext.contains("ann"));
        assert_ne!(row.password_hash, PASSWORD);
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_email() {
        let (state, _store) = memory_state();
        state.auth.register(&register_request(EMAIL, PASSWORD)).await.unwrap();

        let err = state
            .auth
            .register(&register_request("Ann@example.com", "other"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::EmailTaken));
    }

    #[tokio::test]
    async fn test_unknown_email_is_invalid_credentials() {
        let (state, _store) = memory_state();
        let err = state.auth.login("nobody@example.com", PASSWORD).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_five_failures_lock_the_account() {
        let (state, _store) = memory_state();
        state.auth.register(&register_request(EMAIL, PASSWORD)).await.unwrap();

        for _ in 0..MAX_FAILED_ATTEMPTS {
            let err = state.auth.login(EMAIL, "wrong").await.unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredentials));
        }

        let err = state.auth.login(EMAIL, PASSWORD).await.unwrap_err();
        match err {
            AuthError::AccountLocked { until } => {
                let until = until.unwrap();
                assert!(until > Utc::now() + Duration::minutes(14));
                assert!(until <= Utc::now() + Duration::minutes(15));
            }
            other => panic!("expected AccountLocked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_login_succeeds_once_lock_window_elapsed() {
        let (state, store) = memory_state();
        state.auth.register(&register_request(EMAIL, PASSWORD)).await.unwrap();
        for _ in 0..MAX_FAILED_ATTEMPTS {
            let _ = state.auth.login(EMAIL, "wrong").await;
        }

        let mut user = state.users.find_by_email(EMAIL).await.unwrap().unwrap();
        user.locked_until = Some(Utc::now() - Duration::seconds(1));
        store.put_user(&user).await.unwrap();

        state.auth.login(EMAIL, PASSWORD).await.unwrap();
        let user = state.users.find_by_email(EMAIL).await.unwrap().unwrap();
        assert_eq!(user.failed_login_attempts, 0);
        assert_eq!(user.locked_until, None);
    }

    #[tokio::test]
    async fn test_successful_login_resets_counter() {
        let (state, _store) = memory_state();
        state.auth.register(&register_request(EMAIL, PASSWORD)).await.unwrap();

        for _ in 0..3 {
            let _ = state.auth.login(EMAIL, "wrong").await;
        }
        let user = state.users.find_by_email(EMAIL).await.unwrap().unwrap();
        assert_eq!(user.failed_login_attempts, 3);
        assert!(user.last_failed_login_at.is_some());

        state.auth.login(EMAIL, PASSWORD).await.unwrap();
        let user = state.users.find_by_email(EMAIL).await.unwrap().unwrap();
        assert_eq!(user.failed_login_attempts, 0);
        assert_eq!(user.locked_until, None);
    }

    #[tokio::test]
    async fn test_stale_reset_cannot_clear_active_lock() {
        let (state, store) = memory_state();
        state.auth.register(&register_request(EMAIL, PASSWORD)).await.unwrap();
        let stale = state.users.find_by_email(EMAIL).await.unwrap().unwrap();

        let mut locked = stale.clone();
        locked.failed_login_attempts = MAX_FAILED_ATTEMPTS;
        locked.locked_until = Some(Utc::now() + Duration::minutes(15));
        store.put_user(&locked).await.unwrap();

        // A racing writer that read the row before the lock was set.
        let mut racing = stale;
        racing.failed_login_attempts = 0;
        racing.locked_until = None;
        state.users.save_login_state(&racing).await.unwrap();

        let stored = state.users.find_by_email(EMAIL).await.unwrap().unwrap();
        assert_eq!(stored.locked_until, locked.locked_until);
    }

    #[tokio::test]
    async fn test_disabled_account_cannot_log_in() {
        let (state, store) = memory_state();
        state.auth.register(&register_request(EMAIL, PASSWORD)).await.unwrap();
        let mut user = state.users.find_by_email(EMAIL).await.unwrap().unwrap();
        user.enabled = false;
        store.put_user(&user).await.unwrap();

        let err = state.auth.login(EMAIL, PASSWORD).await.unwrap_err();
        assert!(matches!(err, AuthError::AccountDisabled));

        // Without the password the account state is not disclosed.
        let err = state.auth.login(EMAIL, "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_refresh_rotation_is_single_use() {
        let (state, _store) = memory_state();
        let token_a = state
            .auth
            .register(&register_request(EMAIL, PASSWORD))
            .await
            .unwrap()
            .refresh_token;

        let token_b = state.auth.refresh(&token_a).await.unwrap().refresh_token;
        assert_ne!(token_a, token_b);

        let err = state.auth.refresh(&token_a).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidRefreshToken));

        let pair = state.auth.refresh(&token_b).await.unwrap();
        assert_eq!(state.tokens.extract_subject(&pair.access_token).unwrap(), EMAIL);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refresh_succeeds_once() {
        let (state, _store) = memory_state();
        let token = state
            .auth
            .register(&register_request(EMAIL, PASSWORD))
            .await
            .unwrap()
            .refresh_token;

        let (a, b) = tokio::join!(
            {
                let auth = state.auth.clone();
                let token = token.clone();
                tokio::spawn(async move { auth.refresh(&token).await })
            },
            {
                let auth = state.auth.clone();
                let token = token.clone();
                tokio::spawn(async move { auth.refresh(&token).await })
            }
        );
        let results = [a.unwrap(), b.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(AuthError::InvalidRefreshToken))));
    }

    #[tokio::test]
    async fn test_logout_revokes_every_refresh_token() {
        let (state, store) = memory_state();
        let first = state
            .auth
            .register(&register_request(EMAIL, PASSWORD))
            .await
            .unwrap();
        let second = state.auth.login(EMAIL, PASSWORD).await.unwrap();
        let principal = state.tokens.authenticate(&second.access_token).unwrap();

        assert_eq!(state.auth.logout(Some(&principal)).await.unwrap(), 2);
        assert_eq!(store.refresh_token_count().await, 0);

        for token in [first.refresh_token, second.refresh_token] {
            let err = state.auth.refresh(&token).await.unwrap_err();
            assert!(matches!(err, AuthError::InvalidRefreshToken));
        }
    }

    #[tokio::test]
    async fn test_anonymous_logout_is_rejected() {
        let (state, _store) = memory_state();
        let err = state.auth.logout(None).await.unwrap_err();
        assert!(matches!(err, AuthError::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_refresh_with_unknown_token_fails() {
        let (state, _store) = memory_state();
        let err = state.auth.refresh("no-such-token").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidRefreshToken));
    }

    #[tokio::test]
    async fn test_unknown_email_costs_a_password_check() {
        let mut config = test_config();
        config.bcrypt_cost = 8;
        let (state, _store) = memory_state_with(config);
        state.auth.register(&register_request(EMAIL, PASSWORD)).await.unwrap();

        let mut unknown = std::time::Duration::MAX;
        let mut known = std::time::Duration::MAX;
        for _ in 0..3 {
            let started = Instant::now();
            let _ = state.auth.login("nobody@example.com", "wrong").await;
            unknown = unknown.min(started.elapsed());

            let started = Instant::now();
            let _ = state.auth.login(EMAIL, "wrong").await;
            known = known.min(started.elapsed());
        }

        // Both failures pay for one bcrypt verification at the same cost.
        assert!(unknown * 5 >= known, "unknown {unknown:?} vs known {known:?}");
    }

    #[tokio::test]
    async fn test_missing_default_role_leaves_no_account() {
        let (state, store) = memory_state();
        let role = store.find_by_name(DEFAULT_ROLE).await.unwrap().unwrap();
        store.remove_role(role.id).await;

        let err = state
            .auth
            .register(&register_request(EMAIL, PASSWORD))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));
        assert!(!state.users.exists_by_email(EMAIL).await.unwrap());
    }
}
