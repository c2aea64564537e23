//! Remove expired refresh tokens.
//! Run periodically when the in-process sweep is disabled
//! (e.g., via cron job: 0 * * * * /app/sweep-tokens)
//!
//! Usage: sweep-tokens [--dry-run]

use std::sync::Arc;

use chrono::Utc;
use clap::Parser;

use library_api::{
    db::{self, postgres::PgStore, store::RefreshTokenStore},
    services::{encryption::FieldCipher, refresh::RefreshTokenService},
};

#[derive(Parser)]
#[command(name = "sweep-tokens", about = "Delete expired refresh tokens from the library database")]
struct Args {
    /// Only report how many tokens have expired
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("Missing required env var: DATABASE_URL"))?;
    let encryption_key = std::env::var("FIELD_ENCRYPTION_KEY")
        .map_err(|_| anyhow::anyhow!("Missing required env var: FIELD_ENCRYPTION_KEY"))?;

    let pool = db::create_pool(&database_url).await?;
    let cipher = Arc::new(FieldCipher::from_hex_key(&encryption_key)?);
    let store = Arc::new(PgStore::new(pool, cipher));

    if args.dry_run {
        let expired = store.find_all_expired_before(Utc::now()).await?;
        tracing::info!("{} expired refresh token(s) would be removed", expired.len());
        return Ok(());
    }

    tracing::info!("Starting refresh token sweep...");
    let removed = RefreshTokenService::new(store).sweep_expired().await?;
    tracing::info!("Sweep completed: {} expired refresh token(s) removed", removed);

    Ok(())
}
