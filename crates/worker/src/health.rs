//! Liveness and readiness endpoints.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use sqlx::PgPool;

use herald_common::error::AppError;

pub fn router(pool: PgPool) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .with_state(pool)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "herald-worker",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Ready once the record store answers a trivial query.
async fn readiness_check(State(pool): State<PgPool>) -> Result<Json<serde_json::Value>, AppError> {
    sqlx::query("SELECT 1").execute(&pool).await?;
    Ok(Json(json!({ "status": "ready" })))
}
