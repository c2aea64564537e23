use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let Some(db) = state.db.as_ref() else {
        return (
            StatusCode::OK,
            Json(json!({ "status": "ok", "store": "memory" })),
        );
    };

    match sqlx::query("SELECT 1").execute(db).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "store": "postgres" })),
        ),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "error", "store": "postgres" })),
            )
        }
    }
}
