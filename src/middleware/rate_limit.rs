use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap, StatusCode},
    Json,
};
use serde_json::json;

/// Client address used to key anonymous rate limits.
pub struct ClientAddr(pub String);

impl<S> FromRequestParts<S> for ClientAddr
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(ClientAddr(client_key(&parts.headers, peer)))
    }
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`, then the peer address.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(first) = header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    if let Some(real_ip) = header("x-real-ip") {
        return real_ip.to_string();
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Key of the anonymous budget shared by every `/auth/*` call of a client.
pub fn rate_limit_key(client: &str) -> String {
    format!("rate:{client}")
}

/// A counter without a TTL (Redis reports -1) would never reset its window.
fn needs_expiry(ttl: i64) -> bool {
    ttl < 0
}

/// Fixed-window limit stored in Redis.
///
/// - INCR and TTL run in one atomic pipeline
/// - Any hit that finds the counter without a TTL sets it to `window_secs`,
///   so a failed EXPIRE is repaired by the next request
/// - Returns 429 if the counter exceeds `max_attempts`
///
/// Redis errors let the request through.
pub async fn check_rate_limit(
    redis: &mut redis::aio::MultiplexedConnection,
    key: &str,
    max_attempts: u64,
    window_secs: u64,
) -> Result<(), (StatusCode, Json<serde_json::Value>)> {
    let (count, ttl): (u64, i64) = match redis::pipe()
        .atomic()
        .incr(key, 1)
        .ttl(key)
        .query_async(redis)
        .await
    {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!("Rate limiter unavailable, allowing request: {}", e);
            return Ok(());
        }
    };

    if needs_expiry(ttl) {
        let expired: redis::RedisResult<()> = redis::cmd("EXPIRE")
            .arg(key)
            .arg(window_secs)
            .query_async(redis)
            .await;
        if let Err(e) = expired {
            tracing::warn!("Could not set rate limit window on {}: {}", key, e);
        }
    }

    if count > max_attempts {
        tracing::warn!("Rate limit exceeded for {}", key);
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "Too many requests, try again later" })),
        ));
    }

    Ok(())
}
