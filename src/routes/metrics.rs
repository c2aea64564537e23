use axum::http::StatusCode;
use prometheus::{Encoder, TextEncoder};

use crate::services::metrics;

/// GET /metrics: Prometheus scrape endpoint. Meant to stay internal.
pub async fn metrics_handler() -> Result<String, StatusCode> {
    metrics::init();

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
