//! Health probes.
//!
//! `/health` and `/ready` check database connectivity and report the depth
//! of the outbound update queue; `/live` only confirms the process answers.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cadence_core::{Clock, Storage};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, instrument};

use crate::AppState;

/// Health check response body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// When the check ran.
    pub timestamp: DateTime<Utc>,
    /// Per-component results.
    pub checks: HealthChecks,
    /// Updates waiting for hub upload, when the database answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_updates: Option<i64>,
    /// Service version.
    pub version: String,
}

/// Overall health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Everything answered.
    Healthy,
    /// The database did not answer.
    Unhealthy,
}

/// Per-component results.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// Database connectivity.
    pub database: ComponentHealth,
}

/// Result for one component.
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    /// Component status.
    pub status: ComponentStatus,
    /// Failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Time the check took.
    pub response_time_ms: u64,
}

/// Component-level status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Answering.
    Up,
    /// Not answering.
    Down,
}

async fn run_checks(storage: &Storage, clock: &dyn Clock) -> HealthResponse {
    let timestamp = clock.now_utc();
    let started = clock.now();

    let database = match storage.health_check().await {
        Ok(()) => ComponentHealth { status: ComponentStatus::Up, message: None, response_time_ms: 0 },
        Err(e) => {
            error!(error = %e, "database health check failed");
            ComponentHealth {
                status: ComponentStatus::Down,
                message: Some(format!("Database connection failed: {e}")),
                response_time_ms: 0,
            }
        },
    };
    let response_time_ms =
        u64::try_from(clock.now().duration_since(started).as_millis()).unwrap_or(u64::MAX);

    let pending_updates = if database.status == ComponentStatus::Up {
        storage.notification_updates.count_pending().await.ok()
    } else {
        None
    };

    let status = match database.status {
        ComponentStatus::Up => HealthStatus::Healthy,
        ComponentStatus::Down => HealthStatus::Unhealthy,
    };

    HealthResponse {
        status,
        timestamp,
        checks: HealthChecks { database: ComponentHealth { response_time_ms, ..database } },
        pending_updates,
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

/// Database-backed health check.
#[instrument(name = "health_check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Response {
    let response = run_checks(&state.storage, state.clock.as_ref()).await;

    let status_code = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    debug!(status = ?response.status, "health check completed");

    (status_code, Json(response)).into_response()
}

/// Readiness probe; ready means the database answers.
#[instrument(name = "readiness_check", skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Response {
    health_check(State(state)).await
}

/// Liveness probe.
#[instrument(name = "liveness_check", skip(state))]
pub async fn liveness_check(State(state): State<AppState>) -> Response {
    let body = serde_json::json!({
        "status": "alive",
        "timestamp": state.clock.now_utc(),
        "service": "cadence-api",
    });

    (StatusCode::OK, Json(body)).into_response()
}
