use std::{net::SocketAddr, sync::Arc};

use redis::Client as RedisClient;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use library_api::{
    config::Config,
    db::{self, memory::MemoryStore, postgres::PgStore, store::Stores},
    services::{encryption::FieldCipher, metrics, sweeper},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);
    let cipher = Arc::new(FieldCipher::from_hex_key(&config.field_encryption_key)?);

    let (stores, pool) = match config.database_url.as_deref() {
        Some(url) => {
            let pool = db::create_pool(url).await?;
            db::run_migrations(&pool).await?;
            info!("Database connected and migrations applied");
            let store = Arc::new(PgStore::new(pool.clone(), cipher));
            (Stores::from_backend(store), Some(pool))
        }
        None => {
            warn!("DATABASE_URL not set, using the in-memory store");
            (Stores::from_backend(Arc::new(MemoryStore::new(cipher))), None)
        }
    };

    let redis = match config.redis_url.as_deref() {
        Some(url) => {
            let conn = RedisClient::open(url)?
                .get_multiplexed_async_connection()
                .await?;
            info!("Redis connected");
            Some(conn)
        }
        None => {
            info!("REDIS_URL not set, rate limiting disabled");
            None
        }
    };

    metrics::init();
    let state = AppState::new(config.clone(), stores, pool, redis)?;
    sweeper::start(state.refresh_tokens.clone(), config.token_sweep_interval_secs);

    let app = library_api::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Library API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
