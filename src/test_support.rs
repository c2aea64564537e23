use std::sync::Arc;

use crate::{
    config::Config,
    db::{
        memory::MemoryStore,
        store::{RoleStore, Stores, UserStore},
    },
    models::{auth::AuthenticatedUser, user::RegisterRequest},
    services::{encryption::FieldCipher, roles},
    AppState,
};

pub const TEST_JWT_SECRET: &str = "test-jwt-secret";

pub fn test_config() -> Config {
    Config {
        database_url: None,
        redis_url: None,
        jwt_secret: TEST_JWT_SECRET.into(),
        field_encryption_key: "11".repeat(32),
        bcrypt_cost: 4,
        token_sweep_interval_secs: 0,
        rate_limit_max_requests: 10,
        rate_limit_window_secs: 60,
        host: "127.0.0.1".into(),
        port: 0,
    }
}

/// Services over a fresh in-process store.
pub fn memory_state() -> (AppState, Arc<MemoryStore>) {
    memory_state_with(test_config())
}

pub fn memory_state_with(config: Config) -> (AppState, Arc<MemoryStore>) {
    let config = Arc::new(config);
    let cipher = Arc::new(FieldCipher::from_hex_key(&config.field_encryption_key).unwrap());
    let store = Arc::new(MemoryStore::new(cipher));
    let state = AppState::new(config, Stores::from_backend(store.clone()), None, None).unwrap();
    (state, store)
}

pub fn register_request(email: &str, password: &str) -> RegisterRequest {
    RegisterRequest {
        first_name: "Ann".into(),
        last_name: "Lee".into(),
        email: email.into(),
        password: password.into(),
    }
}

/// Registers a user and returns the principal its access token carries.
pub async fn register(state: &AppState, email: &str) -> AuthenticatedUser {
    let pair = state
        .auth
        .register(&register_request(email, "Secr3t!A"))
        .await
        .unwrap();
    state.tokens.authenticate(&pair.access_token).unwrap()
}

/// Registers a user and grants it `ADMIN` directly through the store.
pub async fn register_admin(state: &AppState, store: &MemoryStore, email: &str) -> AuthenticatedUser {
    let principal = register(state, email).await;
    let user = state.users.find_by_email(email).await.unwrap().unwrap();
    let admin = store.find_by_name("ADMIN").await.unwrap().unwrap();
    roles::assign(store, user.id, &admin).await.unwrap();
    principal
}
