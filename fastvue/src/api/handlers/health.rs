//! Health endpoints. Both run a fresh probe per request; they are never cached.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::{
    AppState,
    config::Environment,
    db::health::{HealthReport, HealthStatus},
};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub api_status: &'static str,
    pub app_name: String,
    pub database: HealthReport,
    pub environment: Environment,
}

/// Overall health. Answers 200 whenever the API itself is serving; the database section
/// carries its own status.
#[tracing::instrument(skip_all)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = state.prober.check_health().await;

    Json(HealthResponse {
        api_status: "healthy",
        app_name: state.config.app_name.clone(),
        database,
        environment: state.config.environment,
    })
}

/// Database health only, for monitors. A report in the `error` state answers 503.
#[tracing::instrument(skip_all)]
pub async fn database_health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.prober.check_health().await;

    let status = match report.status {
        HealthStatus::Error => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (status, Json(report))
}
