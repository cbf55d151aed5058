//! Repository for delivery results reported by the hub.

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::debug;

use crate::{
    error::Result,
    models::{NewNotificationResponse, NotificationId, NotificationResponse},
    storage::notifications,
    time::Clock,
    validation::ValidationErrors,
};

const COLUMNS: &str = "id, notification_id, status, error_type, error_msg, delivered_at, created_at";

/// Repository for notification response database operations.
pub struct Repository {
    pool: Arc<SqlitePool>,
    clock: Arc<dyn Clock>,
    notifications: Arc<notifications::Repository>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(
        pool: Arc<SqlitePool>,
        clock: Arc<dyn Clock>,
        notifications: Arc<notifications::Repository>,
    ) -> Self {
        Self { pool, clock, notifications }
    }

    /// Stores a response and writes its status and delivery time onto the
    /// notification, in one transaction.
    ///
    /// Unrecognized statuses are stored verbatim. No update is queued: the
    /// hub is the source of this change.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` if the status or notification is
    /// missing, or the notification does not exist.
    pub async fn create(&self, response: &NewNotificationResponse) -> Result<NotificationResponse> {
        let (notification_id, status) = response.validate()?;
        let mut tx = super::begin_write(&self.pool).await?;

        if self.notifications.find_by_id_in_tx(&mut tx, notification_id).await?.is_none() {
            let mut errors = ValidationErrors::new();
            errors.add("notification", "does not exist");
            return Err(errors.into());
        }

        let query = format!(
            r"
            INSERT INTO notification_responses (
                notification_id, status, error_type, error_msg, delivered_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            RETURNING {COLUMNS}
            "
        );
        let created = sqlx::query_as::<_, NotificationResponse>(&query)
            .bind(notification_id)
            .bind(&status)
            .bind(&response.error_type)
            .bind(&response.error_msg)
            .bind(response.delivered_at)
            .bind(self.clock.now_utc())
            .fetch_one(&mut *tx)
            .await?;

        self.notifications
            .record_delivery_in_tx(&mut tx, notification_id, &status, response.delivered_at)
            .await?;

        tx.commit().await?;

        debug!(
            notification_id = %notification_id,
            status = %created.status,
            "notification response recorded"
        );
        Ok(created)
    }

    /// Responses received for a notification, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn for_notification(
        &self,
        notification_id: NotificationId,
    ) -> Result<Vec<NotificationResponse>> {
        let query = format!(
            "SELECT {COLUMNS} FROM notification_responses WHERE notification_id = ? ORDER BY id ASC"
        );
        let responses = sqlx::query_as::<_, NotificationResponse>(&query)
            .bind(notification_id)
            .fetch_all(&*self.pool)
            .await?;

        Ok(responses)
    }
}
