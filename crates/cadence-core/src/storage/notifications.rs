//! Repository for notifications.
//!
//! A notification exists at most once per (enrollment, message); the unique
//! key makes concurrent enqueues of the same enrollment safe.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool, Transaction};

use crate::{
    error::{unique_violation, CoreError, Result},
    models::{
        EnrollmentId, MessageId, Notification, NotificationId, NotificationStatus,
    },
    snapshot::NotificationContext,
    time::Clock,
    validation::ValidationErrors,
};

const COLUMNS: &str =
    "id, enrollment_id, message_id, status, delivery_start, delivered_at, created_at, updated_at";

/// Values for a new notification row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    /// Owning enrollment.
    pub enrollment_id: EnrollmentId,
    /// Message to instantiate.
    pub message_id: MessageId,
    /// Initial status.
    pub status: NotificationStatus,
    /// Scheduled delivery date.
    pub delivery_start: NaiveDate,
}

/// Repository for notification database operations.
pub struct Repository {
    pool: Arc<SqlitePool>,
    clock: Arc<dyn Clock>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<SqlitePool>, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Inserts a notification within a transaction.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` if the message is already scheduled
    /// for the enrollment.
    pub async fn create_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        notification: &NewNotification,
    ) -> Result<Notification> {
        let now = self.clock.now_utc();
        let query = format!(
            r"
            INSERT INTO notifications (
                enrollment_id, message_id, status, delivery_start, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            RETURNING {COLUMNS}
            "
        );

        sqlx::query_as::<_, Notification>(&query)
            .bind(notification.enrollment_id)
            .bind(notification.message_id)
            .bind(&notification.status)
            .bind(notification.delivery_start)
            .bind(now)
            .bind(now)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| match unique_violation(&e) {
                Some(_) => {
                    let mut errors = ValidationErrors::new();
                    errors.add("message_id", "is already scheduled for this enrollment");
                    CoreError::Validation(errors)
                },
                None => e.into(),
            })
    }

    /// Inserts a notification unless one exists for the same enrollment and
    /// message. Returns `None` when another writer got there first.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails for any other reason.
    pub async fn create_if_absent_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        notification: &NewNotification,
    ) -> Result<Option<Notification>> {
        let now = self.clock.now_utc();
        let query = format!(
            r"
            INSERT INTO notifications (
                enrollment_id, message_id, status, delivery_start, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (enrollment_id, message_id) DO NOTHING
            RETURNING {COLUMNS}
            "
        );

        let created = sqlx::query_as::<_, Notification>(&query)
            .bind(notification.enrollment_id)
            .bind(notification.message_id)
            .bind(&notification.status)
            .bind(notification.delivery_start)
            .bind(now)
            .bind(now)
            .fetch_optional(&mut **tx)
            .await?;

        Ok(created)
    }

    /// Finds a notification by id.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: NotificationId) -> Result<Option<Notification>> {
        self.find_by_id_impl(&*self.pool, id).await
    }

    /// Finds a notification by id within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: NotificationId,
    ) -> Result<Option<Notification>> {
        self.find_by_id_impl(&mut **tx, id).await
    }

    async fn find_by_id_impl<'e, E>(
        &self,
        executor: E,
        id: NotificationId,
    ) -> Result<Option<Notification>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let query = format!("SELECT {COLUMNS} FROM notifications WHERE id = ?");
        let notification =
            sqlx::query_as::<_, Notification>(&query).bind(id).fetch_optional(executor).await?;

        Ok(notification)
    }

    /// Lists an enrollment's notifications in creation order.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn list_for_enrollment(&self, enrollment_id: EnrollmentId) -> Result<Vec<Notification>> {
        let query =
            format!("SELECT {COLUMNS} FROM notifications WHERE enrollment_id = ? ORDER BY id ASC");
        let notifications = sqlx::query_as::<_, Notification>(&query)
            .bind(enrollment_id)
            .fetch_all(&*self.pool)
            .await?;

        Ok(notifications)
    }

    /// Cancels every ACTIVE notification of an enrollment and returns the
    /// affected ids in ascending order. Other statuses are left untouched.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn cancel_active_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        enrollment_id: EnrollmentId,
    ) -> Result<Vec<NotificationId>> {
        let mut ids: Vec<NotificationId> = sqlx::query_scalar(
            r"
            UPDATE notifications
            SET status = ?, updated_at = ?
            WHERE enrollment_id = ? AND status = ?
            RETURNING id
            ",
        )
        .bind(NotificationStatus::CANCELLED)
        .bind(self.clock.now_utc())
        .bind(enrollment_id)
        .bind(NotificationStatus::ACTIVE)
        .fetch_all(&mut **tx)
        .await?;

        ids.sort_unstable();
        Ok(ids)
    }

    /// Writes a reported status and delivery time onto a notification.
    ///
    /// Any status string is stored as-is.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the notification does not exist.
    pub async fn record_delivery_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: NotificationId,
        status: &NotificationStatus,
        delivered_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE notifications SET status = ?, delivered_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status)
        .bind(delivered_at)
        .bind(self.clock.now_utc())
        .bind(id)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("notification {id}")));
        }
        Ok(())
    }

    /// Loads a notification with its enrollment, message and stream.
    ///
    /// # Errors
    ///
    /// Returns error if a query fails.
    pub async fn context(&self, id: NotificationId) -> Result<Option<NotificationContext>> {
        let mut conn = self.pool.acquire().await?;
        Self::context_on(&mut conn, id).await
    }

    /// Loads a notification context within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if a query fails.
    pub async fn context_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: NotificationId,
    ) -> Result<Option<NotificationContext>> {
        Self::context_on(&mut **tx, id).await
    }

    async fn context_on(
        conn: &mut SqliteConnection,
        id: NotificationId,
    ) -> Result<Option<NotificationContext>> {
        let query = format!("SELECT {COLUMNS} FROM notifications WHERE id = ?");
        let Some(notification) =
            sqlx::query_as::<_, Notification>(&query).bind(id).fetch_optional(&mut *conn).await?
        else {
            return Ok(None);
        };

        let enrollment = sqlx::query_as(
            r"
            SELECT id, message_stream_id, first_name, last_name, phone_number, ext_user_id,
                   delivery_method, stream_start, preferred_time, language, status,
                   variables, created_at, updated_at
            FROM enrollments WHERE id = ?
            ",
        )
        .bind(notification.enrollment_id)
        .fetch_one(&mut *conn)
        .await?;

        let message = sqlx::query_as(
            r"
            SELECT id, message_stream_id, name, title, sms_text, offset_days, language,
                   expire_days, created_at
            FROM messages WHERE id = ?
            ",
        )
        .bind(notification.message_id)
        .fetch_one(&mut *conn)
        .await?;

        let stream = sqlx::query_as(
            r"
            SELECT s.id, s.name, s.title, s.created_at
            FROM message_streams s
            JOIN messages m ON m.message_stream_id = s.id
            WHERE m.id = ?
            ",
        )
        .bind(notification.message_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(Some(NotificationContext { notification, enrollment, message, stream }))
    }
}
