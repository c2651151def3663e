use axum::{Json, Router, extract::State, routing::get};
use chrono::Utc;

use crate::models::AppState;

#[derive(serde::Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub environment: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

/// Liveness only; the store is not touched.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        environment: state.environment.clone(),
    })
}
