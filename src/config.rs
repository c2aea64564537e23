use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    /// Absent means the in-process store is used.
    pub database_url: Option<String>,
    /// Absent disables rate limiting.
    pub redis_url: Option<String>,
    pub jwt_secret: String,
    /// 64 hex characters (32 bytes). Keys for email encryption and the
    /// blind index are derived from it.
    pub field_encryption_key: String,
    pub bcrypt_cost: u32,
    /// 0 disables the background sweep.
    pub token_sweep_interval_secs: u64,
    pub rate_limit_max_requests: u64,
    pub rate_limit_window_secs: u64,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: optional("DATABASE_URL"),
            redis_url: optional("REDIS_URL"),
            jwt_secret: required("JWT_SECRET")?,
            field_encryption_key: required("FIELD_ENCRYPTION_KEY")?,
            bcrypt_cost: env::var("BCRYPT_COST")
                .unwrap_or_else(|_| bcrypt::DEFAULT_COST.to_string())
                .parse()?,
            token_sweep_interval_secs: env::var("TOKEN_SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "3600".into())
                .parse()?,
            rate_limit_max_requests: env::var("RATE_LIMIT_MAX_REQUESTS")
                .unwrap_or_else(|_| "10".into())
                .parse()?,
            rate_limit_window_secs: env::var("RATE_LIMIT_WINDOW_SECS")
                .unwrap_or_else(|_| "60".into())
                .parse()?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,
        })
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    env::var(key)
        .ok()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Missing required env var: {}", key))
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}
