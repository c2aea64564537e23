use lazy_static::lazy_static;
use prometheus::{register_counter, register_counter_vec, Counter, CounterVec};

use crate::{
    error::{AuthError, AuthResult},
    models::auth::TokenPair,
};

lazy_static! {
    pub static ref LOGINS_COUNTER: CounterVec = register_counter_vec!(
        "auth_logins_total",
        "Login attempts by outcome",
        &["status"]
    ).unwrap();

    pub static ref REGISTRATIONS_COUNTER: Counter = register_counter!(
        "auth_registrations_total",
        "Accounts registered"
    ).unwrap();

    pub static ref LOCKOUTS_COUNTER: Counter = register_counter!(
        "auth_lockouts_total",
        "Accounts locked after repeated failed logins"
    ).unwrap();

    pub static ref REFRESH_COUNTER: CounterVec = register_counter_vec!(
        "auth_refresh_rotations_total",
        "Refresh token rotations by outcome",
        &["status"]
    ).unwrap();

    pub static ref SWEPT_TOKENS_COUNTER: Counter = register_counter!(
        "auth_refresh_tokens_swept_total",
        "Expired refresh tokens removed by the sweeper"
    ).unwrap();
}

/// Label for a login outcome.
pub fn login_status(result: &AuthResult<TokenPair>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(AuthError::InvalidCredentials) => "invalid_credentials",
        Err(AuthError::AccountLocked { .. }) => "locked",
        Err(AuthError::AccountDisabled) => "disabled",
        Err(_) => "error",
    }
}

/// Registers every counter so a scrape lists them before their first event.
pub fn init() {
    lazy_static::initialize(&LOGINS_COUNTER);
    lazy_static::initialize(&REGISTRATIONS_COUNTER);
    lazy_static::initialize(&LOCKOUTS_COUNTER);
    lazy_static::initialize(&REFRESH_COUNTER);
    lazy_static::initialize(&SWEPT_TOKENS_COUNTER);
}
