//! Repository for stream messages.
//!
//! Also answers the scheduling question "which of this stream's messages are
//! due and not yet instantiated for an enrollment".

use std::{ops::RangeInclusive, sync::Arc};

use sqlx::{Executor, Sqlite, SqlitePool, Transaction};

use crate::{
    error::{unique_violation, CoreError, Result},
    models::{EnrollmentId, Message, MessageId, MessageStreamId, NewMessage},
    time::Clock,
    validation::ValidationErrors,
};

const COLUMNS: &str =
    "id, message_stream_id, name, title, sms_text, offset_days, language, expire_days, created_at";

/// Repository for message database operations.
pub struct Repository {
    pool: Arc<SqlitePool>,
    clock: Arc<dyn Clock>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<SqlitePool>, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Creates a message, applying defaults for unset optional fields.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` for missing fields, an unknown stream
    /// or a name already used in the stream.
    pub async fn create(&self, message: &NewMessage) -> Result<Message> {
        message.validate()?;

        let query = format!(
            r"
            INSERT INTO messages (
                message_stream_id, name, title, sms_text, offset_days,
                language, expire_days, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {COLUMNS}
            "
        );

        sqlx::query_as::<_, Message>(&query)
            .bind(message.message_stream_id)
            .bind(&message.name)
            .bind(&message.title)
            .bind(&message.sms_text)
            .bind(message.offset_days.unwrap_or(0))
            .bind(message.language.as_deref().unwrap_or(NewMessage::DEFAULT_LANGUAGE))
            .bind(message.expire_days)
            .bind(self.clock.now_utc())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| {
                let mut errors = ValidationErrors::new();
                if unique_violation(&e).is_some() {
                    errors.add("name", "has already been taken");
                    return CoreError::Validation(errors);
                }
                match CoreError::from(e) {
                    CoreError::ConstraintViolation(_) => {
                        errors.add("message_stream_id", "does not exist");
                        CoreError::Validation(errors)
                    },
                    other => other,
                }
            })
    }

    /// Finds a message by id.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>> {
        self.find_by_id_impl(&*self.pool, id).await
    }

    /// Finds a message by id within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: MessageId,
    ) -> Result<Option<Message>> {
        self.find_by_id_impl(&mut **tx, id).await
    }

    async fn find_by_id_impl<'e, E>(&self, executor: E, id: MessageId) -> Result<Option<Message>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let query = format!("SELECT {COLUMNS} FROM messages WHERE id = ?");
        let message =
            sqlx::query_as::<_, Message>(&query).bind(id).fetch_optional(executor).await?;

        Ok(message)
    }

    /// Lists a stream's messages in schedule order.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn list_for_stream(&self, stream_id: MessageStreamId) -> Result<Vec<Message>> {
        let query = format!(
            "SELECT {COLUMNS} FROM messages WHERE message_stream_id = ? ORDER BY offset_days ASC, id ASC"
        );
        let messages =
            sqlx::query_as::<_, Message>(&query).bind(stream_id).fetch_all(&*self.pool).await?;

        Ok(messages)
    }

    /// Messages of `stream_id` with an offset in `offsets` that have no
    /// notification for `enrollment_id` yet, in schedule order.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn unscheduled(
        &self,
        stream_id: MessageStreamId,
        enrollment_id: EnrollmentId,
        offsets: RangeInclusive<i64>,
    ) -> Result<Vec<Message>> {
        self.unscheduled_impl(&*self.pool, stream_id, enrollment_id, offsets).await
    }

    /// Same as [`Self::unscheduled`] within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn unscheduled_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        stream_id: MessageStreamId,
        enrollment_id: EnrollmentId,
        offsets: RangeInclusive<i64>,
    ) -> Result<Vec<Message>> {
        self.unscheduled_impl(&mut **tx, stream_id, enrollment_id, offsets).await
    }

    async fn unscheduled_impl<'e, E>(
        &self,
        executor: E,
        stream_id: MessageStreamId,
        enrollment_id: EnrollmentId,
        offsets: RangeInclusive<i64>,
    ) -> Result<Vec<Message>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let query = format!(
            r"
            SELECT {COLUMNS} FROM messages m
            WHERE m.message_stream_id = ?
              AND m.offset_days BETWEEN ? AND ?
              AND NOT EXISTS (
                  SELECT 1 FROM notifications n
                  WHERE n.enrollment_id = ? AND n.message_id = m.id
              )
            ORDER BY m.offset_days ASC, m.id ASC
            "
        );

        let messages = sqlx::query_as::<_, Message>(&query)
            .bind(stream_id)
            .bind(*offsets.start())
            .bind(*offsets.end())
            .bind(enrollment_id)
            .fetch_all(executor)
            .await?;

        Ok(messages)
    }
}
