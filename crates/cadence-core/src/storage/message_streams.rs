//! Repository for message streams.

use std::sync::Arc;

use sqlx::{Executor, Sqlite, SqlitePool, Transaction};

use crate::{
    error::{unique_violation, CoreError, Result},
    models::{MessageStream, MessageStreamId, NewMessageStream},
    time::Clock,
    validation::{ValidationErrors, BLANK},
};

/// Repository for message stream database operations.
pub struct Repository {
    pool: Arc<SqlitePool>,
    clock: Arc<dyn Clock>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<SqlitePool>, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Creates a stream.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` if the name is blank or already taken.
    pub async fn create(&self, stream: &NewMessageStream) -> Result<MessageStream> {
        let mut errors = ValidationErrors::new();
        if stream.name.trim().is_empty() {
            errors.add("name", BLANK);
        }
        if stream.title.trim().is_empty() {
            errors.add("title", BLANK);
        }
        errors.into_result()?;

        sqlx::query_as::<_, MessageStream>(
            r"
            INSERT INTO message_streams (name, title, created_at)
            VALUES (?, ?, ?)
            RETURNING id, name, title, created_at
            ",
        )
        .bind(&stream.name)
        .bind(&stream.title)
        .bind(self.clock.now_utc())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(_) => {
                let mut errors = ValidationErrors::new();
                errors.add("name", "has already been taken");
                CoreError::Validation(errors)
            },
            None => e.into(),
        })
    }

    /// Finds a stream by id.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: MessageStreamId) -> Result<Option<MessageStream>> {
        Self::find_by_id_impl(&*self.pool, id).await
    }

    /// Finds a stream by id within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: MessageStreamId,
    ) -> Result<Option<MessageStream>> {
        Self::find_by_id_impl(&mut **tx, id).await
    }

    async fn find_by_id_impl<'e, E>(executor: E, id: MessageStreamId) -> Result<Option<MessageStream>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let stream = sqlx::query_as::<_, MessageStream>(
            "SELECT id, name, title, created_at FROM message_streams WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(stream)
    }

    /// Finds a stream by its unique name.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<MessageStream>> {
        let stream = sqlx::query_as::<_, MessageStream>(
            "SELECT id, name, title, created_at FROM message_streams WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(stream)
    }

    /// Lists every stream by name.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn list(&self) -> Result<Vec<MessageStream>> {
        let streams = sqlx::query_as::<_, MessageStream>(
            "SELECT id, name, title, created_at FROM message_streams ORDER BY name ASC",
        )
        .fetch_all(&*self.pool)
        .await?;

        Ok(streams)
    }

    /// Distinct languages across the stream's messages, sorted.
    ///
    /// Computed on every call.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn languages(&self, id: MessageStreamId) -> Result<Vec<String>> {
        let languages = sqlx::query_scalar::<_, String>(
            r"
            SELECT DISTINCT language FROM messages
            WHERE message_stream_id = ?
            ORDER BY language ASC
            ",
        )
        .bind(id)
        .fetch_all(&*self.pool)
        .await?;

        Ok(languages)
    }
}
