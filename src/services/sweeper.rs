use std::sync::Arc;

use tracing::{info, warn};

use crate::services::{metrics::SWEPT_TOKENS_COUNTER, refresh::RefreshTokenService};

/// Spawn a background task that removes expired refresh tokens every
/// `interval_secs`. An interval of 0 leaves the sweep to the CLI.
pub fn start(refresh_tokens: Arc<RefreshTokenService>, interval_secs: u64) {
    if interval_secs == 0 {
        info!("Refresh token sweep disabled");
        return;
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));
        // The first tick fires immediately; skip it so startup is not delayed.
        interval.tick().await;
        loop {
            interval.tick().await;
            sweep_once(&refresh_tokens).await;
        }
    });
}

/// One sweep pass. Errors are logged and retried on the next tick.
pub async fn sweep_once(refresh_tokens: &RefreshTokenService) -> u64 {
    match refresh_tokens.sweep_expired().await {
        Ok(0) => 0,
        Ok(n) => {
            SWEPT_TOKENS_COUNTER.inc_by(n as f64);
            info!("Token sweep: removed {} expired refresh token(s)", n);
            n
        }
        Err(e) => {
            warn!("Token sweep failed: {}", e);
            0
        }
    }
}
