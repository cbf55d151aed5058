//! Repository for the outbound update queue.
//!
//! Updates are append-only snapshots. The hub replays a notification's
//! history by id, so every listing here is in ascending id order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{types::Json, Executor, QueryBuilder, Sqlite, SqlitePool, Transaction};

use crate::{
    error::{CoreError, Result},
    models::{NewNotificationUpdate, NotificationId, NotificationUpdate, NotificationUpdateId},
    time::Clock,
    validation::ValidationErrors,
};

const COLUMNS: &str = "id, notification_id, first_name, phone_number, delivery_method, \
                       message_path, delivery_date, delivery_expires, preferred_time, \
                       ext_user_id, action, response_code, uploaded_at, variables, created_at";

/// Repository for notification update database operations.
pub struct Repository {
    pool: Arc<SqlitePool>,
    clock: Arc<dyn Clock>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<SqlitePool>, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Validates and stores an update.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` for missing fields, an unknown action
    /// or an unknown notification.
    pub async fn create(&self, update: &NewNotificationUpdate) -> Result<NotificationUpdate> {
        let mut tx = super::begin_write(&self.pool).await?;
        let created = self.create_in_tx(&mut tx, update).await?;
        tx.commit().await?;
        Ok(created)
    }

    /// Validates and stores an update within a transaction.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` for missing fields, an unknown action
    /// or an unknown notification.
    pub async fn create_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        update: &NewNotificationUpdate,
    ) -> Result<NotificationUpdate> {
        let valid = update.validate()?;
        let query = format!(
            r"
            INSERT INTO notification_updates (
                id, notification_id, first_name, phone_number, delivery_method,
                message_path, delivery_date, delivery_expires, preferred_time,
                ext_user_id, action, response_code, uploaded_at, variables, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {COLUMNS}
            "
        );

        sqlx::query_as::<_, NotificationUpdate>(&query)
            .bind(valid.id)
            .bind(valid.notification_id)
            .bind(&valid.first_name)
            .bind(&valid.phone_number)
            .bind(&valid.delivery_method)
            .bind(&valid.message_path)
            .bind(valid.delivery_date)
            .bind(valid.delivery_expires)
            .bind(&valid.preferred_time)
            .bind(&valid.ext_user_id)
            .bind(valid.action)
            .bind(valid.response_code)
            .bind(valid.uploaded_at)
            .bind(Json(&valid.variables))
            .bind(self.clock.now_utc())
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| match CoreError::from(e) {
                CoreError::ConstraintViolation(_) => {
                    let mut errors = ValidationErrors::new();
                    errors.add("notification_id", "does not exist");
                    CoreError::Validation(errors)
                },
                other => other,
            })
    }

    /// Finds an update by id.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: NotificationUpdateId) -> Result<Option<NotificationUpdate>> {
        let query = format!("SELECT {COLUMNS} FROM notification_updates WHERE id = ?");
        let update = sqlx::query_as::<_, NotificationUpdate>(&query)
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?;

        Ok(update)
    }

    /// Finds update `id` only if it belongs to `notification_id`.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_for_notification(
        &self,
        notification_id: NotificationId,
        id: NotificationUpdateId,
    ) -> Result<Option<NotificationUpdate>> {
        let query = format!(
            "SELECT {COLUMNS} FROM notification_updates WHERE id = ? AND notification_id = ?"
        );
        let update = sqlx::query_as::<_, NotificationUpdate>(&query)
            .bind(id)
            .bind(notification_id)
            .fetch_optional(&*self.pool)
            .await?;

        Ok(update)
    }

    /// A notification's updates in ascending id order.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn for_notification(
        &self,
        notification_id: NotificationId,
    ) -> Result<Vec<NotificationUpdate>> {
        self.for_notification_impl(&*self.pool, notification_id).await
    }

    /// Same as [`Self::for_notification`] within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn for_notification_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        notification_id: NotificationId,
    ) -> Result<Vec<NotificationUpdate>> {
        self.for_notification_impl(&mut **tx, notification_id).await
    }

    async fn for_notification_impl<'e, E>(
        &self,
        executor: E,
        notification_id: NotificationId,
    ) -> Result<Vec<NotificationUpdate>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let query = format!(
            "SELECT {COLUMNS} FROM notification_updates WHERE notification_id = ? ORDER BY id ASC"
        );
        let updates = sqlx::query_as::<_, NotificationUpdate>(&query)
            .bind(notification_id)
            .fetch_all(executor)
            .await?;

        Ok(updates)
    }

    /// Updates not yet accepted by the hub, oldest first. `limit` caps the
    /// batch; `None` returns the whole queue.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn pending(&self, limit: Option<i64>) -> Result<Vec<NotificationUpdate>> {
        let query = format!(
            "SELECT {COLUMNS} FROM notification_updates WHERE uploaded_at IS NULL \
             ORDER BY id ASC LIMIT ?"
        );
        // SQLite treats a negative LIMIT as unbounded.
        let updates = sqlx::query_as::<_, NotificationUpdate>(&query)
            .bind(limit.unwrap_or(-1))
            .fetch_all(&*self.pool)
            .await?;

        Ok(updates)
    }

    /// Number of updates awaiting upload.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_pending(&self) -> Result<i64> {
        let count =
            sqlx::query_scalar("SELECT COUNT(*) FROM notification_updates WHERE uploaded_at IS NULL")
                .fetch_one(&*self.pool)
                .await?;

        Ok(count)
    }

    /// Stamps updates accepted by the hub. Already uploaded rows keep their
    /// original stamp. Returns the number of rows changed.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_uploaded(
        &self,
        ids: &[NotificationUpdateId],
        uploaded_at: DateTime<Utc>,
        response_code: i32,
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE notification_updates SET uploaded_at = ");
        builder.push_bind(uploaded_at);
        builder.push(", response_code = ");
        builder.push_bind(response_code);
        builder.push(" WHERE uploaded_at IS NULL AND id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let result = builder.build().execute(&*self.pool).await?;
        Ok(result.rows_affected())
    }
}
