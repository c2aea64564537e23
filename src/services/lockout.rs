use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::{db::store::UserStore, error::AuthResult, models::user::User};

pub const MAX_FAILED_ATTEMPTS: i32 = 5;
pub const LOCKOUT_DURATION_MINUTES: i64 = 15;

/// Decides the lock expiry to store when `incoming` is written over `current`.
///
/// A lock that is still active at `now` survives any write that would end it
/// sooner, including a reset (`incoming == None`). Expired locks can be
/// replaced or cleared freely.
pub fn merge_lock(
    current: Option<DateTime<Utc>>,
    incoming: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match (current, incoming) {
        (Some(active), Some(new)) if active > now && new < active => Some(active),
        (Some(active), None) if active > now => Some(active),
        _ => incoming,
    }
}

/// Consecutive failed-login accounting with a temporary lock.
pub struct LockoutPolicy {
    users: Arc<dyn UserStore>,
}

impl LockoutPolicy {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    pub fn is_locked(user: &User) -> bool {
        Self::is_locked_at(user, Utc::now())
    }

    pub fn is_locked_at(user: &User, now: DateTime<Utc>) -> bool {
        user.locked_until.is_some_and(|until| until > now)
    }

    /// Call only after a confirmed password mismatch.
    pub async fn record_failed_attempt(&self, user: &mut User) -> AuthResult<()> {
        let now = Utc::now();
        user.failed_login_attempts += 1;
        user.last_failed_login_at = Some(now);

        if user.failed_login_attempts >= MAX_FAILED_ATTEMPTS {
            let until = now + Duration::minutes(LOCKOUT_DURATION_MINUTES);
            user.locked_until = Some(until);
            crate::services::metrics::LOCKOUTS_COUNTER.inc();
            tracing::warn!(
                "Account {} locked until {} after {} failed attempts",
                user.id,
                until,
                user.failed_login_attempts
            );
        } else {
            tracing::warn!(
                "Failed login attempt {} for account {}",
                user.failed_login_attempts,
                user.id
            );
        }

        self.users.save_login_state(user).await
    }

    /// Clears the counter and lock after a successful login.
    pub async fn reset(&self, user: &mut User) -> AuthResult<()> {
        if user.failed_login_attempts == 0 && user.locked_until.is_none() {
            return Ok(());
        }
        user.failed_login_attempts = 0;
        user.locked_until = None;
        self.users.save_login_state(user).await
    }
}
