//! Admin views of a notification's outbound updates.
//!
//! JSON clients get the records; browsers are redirected to the
//! notification itself, which is where updates are listed for humans.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use cadence_core::{NotificationId, NotificationUpdateId};
use serde_json::json;
use tracing::{debug, instrument};

use crate::{error::ApiError, AppState};

/// Returns true when the client prefers HTML over JSON.
fn wants_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"))
}

fn notification_page(id: NotificationId) -> Response {
    Redirect::to(&format!("/admin/notifications/{id}")).into_response()
}

async fn require_notification(state: &AppState, id: NotificationId) -> Result<(), ApiError> {
    state
        .storage
        .notifications
        .find_by_id(id)
        .await?
        .map(|_| ())
        .ok_or_else(|| ApiError::not_found(format!("notification {id}")))
}

/// `GET /admin/notifications/{notification_id}/updates`
///
/// # Errors
///
/// Returns 404 if the notification does not exist.
#[instrument(name = "list_updates", skip(state, headers), fields(notification_id = %notification_id))]
pub async fn list_updates(
    State(state): State<AppState>,
    Path(notification_id): Path<NotificationId>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    require_notification(&state, notification_id).await?;

    if wants_html(&headers) {
        return Ok(notification_page(notification_id));
    }

    let updates = state.storage.notification_updates.for_notification(notification_id).await?;
    debug!(count = updates.len(), "listing updates");
    Ok(Json(updates).into_response())
}

/// `GET /admin/notifications/{notification_id}/updates/{id}`
///
/// # Errors
///
/// Returns 404 if the update does not exist or belongs to another
/// notification.
#[instrument(name = "show_update", skip(state, headers), fields(notification_id = %notification_id, update_id = %id))]
pub async fn show_update(
    State(state): State<AppState>,
    Path((notification_id, id)): Path<(NotificationId, NotificationUpdateId)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let update = state
        .storage
        .notification_updates
        .find_for_notification(notification_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("notification update {id}")))?;

    if wants_html(&headers) {
        return Ok(notification_page(notification_id));
    }

    Ok(Json(json!({ "notification_update": update })).into_response())
}
