//! Delivery results posted back by the hub.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use cadence_core::NewNotificationResponse;
use serde_json::json;
use tracing::{info, instrument};

use crate::{error::ApiError, AppState};

/// `POST /hub/responses`
///
/// Records the response and writes its status through to the notification.
///
/// # Errors
///
/// Returns 422 with the field error map if the response is incomplete or
/// names an unknown notification.
#[instrument(
    name = "create_response",
    skip(state, payload),
    fields(notification_id = ?payload.notification_id, status = ?payload.status)
)]
pub async fn create_response(
    State(state): State<AppState>,
    Json(payload): Json<NewNotificationResponse>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state.storage.notification_responses.create(&payload).await?;

    info!(response_id = %response.id, "hub response recorded");
    Ok((StatusCode::CREATED, Json(json!({ "notification_response": response }))))
}
