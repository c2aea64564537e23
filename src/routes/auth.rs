use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::{
    middleware::rate_limit::{check_rate_limit, rate_limit_key, ClientAddr},
    models::{
        auth::{AuthenticatedUser, TokenPair},
        user::{LoginRequest, RefreshTokenRequest, RegisterRequest},
    },
    AppState,
};

/// Anonymous endpoints draw from one budget per client.
async fn throttle(state: &AppState, client: &str) -> Result<(), Response> {
    let Some(redis) = state.redis.as_ref() else {
        return Ok(());
    };
    let mut redis = redis.clone();
    let key = rate_limit_key(client);
    check_rate_limit(
        &mut redis,
        &key,
        state.config.rate_limit_max_requests,
        state.config.rate_limit_window_secs,
    )
    .await
    .map_err(IntoResponse::into_response)
}

pub async fn login(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    Json(body): Json<LoginRequest>,
) -> Result<Json<TokenPair>, Response> {
    throttle(&state, &client).await?;
    let pair = state
        .auth
        .login(&body.email, &body.password)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(pair))
}

pub async fn register(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<TokenPair>), Response> {
    throttle(&state, &client).await?;
    let pair = state
        .auth
        .register(&body)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok((StatusCode::CREATED, Json(pair)))
}

pub async fn refresh_token(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    Json(body): Json<RefreshTokenRequest>,
) -> Result<Json<TokenPair>, Response> {
    throttle(&state, &client).await?;
    let pair = state
        .auth
        .refresh(&body.refresh_token)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(pair))
}

pub async fn logout(
    State(state): State<AppState>,
    user: Option<AuthenticatedUser>,
) -> Result<Json<Value>, Response> {
    let revoked = state
        .auth
        .logout(user.as_ref())
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(json!({ "revoked_refresh_tokens": revoked })))
}
