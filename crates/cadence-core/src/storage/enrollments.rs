//! Repository for enrollments.
//!
//! Two uniqueness rules apply per message stream: one ACTIVE enrollment per
//! phone number, and one enrollment of any status per external user id. Both
//! are partial unique indexes; the pre-checks here only exist to report the
//! common case without a failed insert. Whichever fires, the caller sees the
//! same base-level validation error.

use std::sync::Arc;

use sqlx::{types::Json, Executor, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::{
    error::{unique_violation, CoreError, Result},
    models::{Enrollment, EnrollmentId, EnrollmentStatus, MessageStreamId, NewEnrollment},
    time::Clock,
    validation::ValidationErrors,
};

/// Base error for a second ACTIVE enrollment of a phone number in a stream.
pub const ACTIVE_CONFLICT: &str =
    "Phone number already has an active enrollment in this message stream";

/// Base error for a reused external user id within a stream.
pub const EXT_USER_CONFLICT: &str = "External user id is already enrolled in this message stream";

const COLUMNS: &str = "id, message_stream_id, first_name, last_name, phone_number, ext_user_id, \
                       delivery_method, stream_start, preferred_time, language, status, \
                       variables, created_at, updated_at";

/// Repository for enrollment database operations.
pub struct Repository {
    pool: Arc<SqlitePool>,
    clock: Arc<dyn Clock>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<SqlitePool>, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Validates and inserts an enrollment.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` for missing or invalid fields, an
    /// unknown stream, or a uniqueness conflict.
    pub async fn create(&self, enrollment: &NewEnrollment) -> Result<Enrollment> {
        let valid = enrollment.validate()?;
        let mut tx = super::begin_write(&self.pool).await?;

        let stream_exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM message_streams WHERE id = ?)")
                .bind(valid.message_stream_id)
                .fetch_one(&mut *tx)
                .await?;
        if !stream_exists {
            let mut errors = ValidationErrors::new();
            errors.add("message_stream_id", "does not exist");
            return Err(errors.into());
        }

        if valid.status == EnrollmentStatus::Active
            && Self::active_conflict_impl(
                &mut *tx,
                &valid.phone_number,
                valid.message_stream_id,
                None,
            )
            .await?
        {
            return Err(ValidationErrors::base(ACTIVE_CONFLICT).into());
        }

        if let Some(ext_user_id) = &valid.ext_user_id {
            let taken: bool = sqlx::query_scalar(
                r"
                SELECT EXISTS (
                    SELECT 1 FROM enrollments
                    WHERE ext_user_id = ? AND message_stream_id = ?
                )
                ",
            )
            .bind(ext_user_id)
            .bind(valid.message_stream_id)
            .fetch_one(&mut *tx)
            .await?;
            if taken {
                return Err(ValidationErrors::base(EXT_USER_CONFLICT).into());
            }
        }

        let now = self.clock.now_utc();
        let query = format!(
            r"
            INSERT INTO enrollments (
                message_stream_id, first_name, last_name, phone_number, ext_user_id,
                delivery_method, stream_start, preferred_time, language, status,
                variables, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {COLUMNS}
            "
        );
        let created = sqlx::query_as::<_, Enrollment>(&query)
            .bind(valid.message_stream_id)
            .bind(&valid.first_name)
            .bind(&valid.last_name)
            .bind(&valid.phone_number)
            .bind(&valid.ext_user_id)
            .bind(&valid.delivery_method)
            .bind(valid.stream_start)
            .bind(&valid.preferred_time)
            .bind(&valid.language)
            .bind(valid.status)
            .bind(Json(&valid.variables))
            .bind(now)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(translate_conflict)?;

        tx.commit().await?;

        debug!(
            enrollment_id = %created.id,
            stream_id = %created.message_stream_id,
            status = %created.status,
            "enrollment created"
        );
        Ok(created)
    }

    /// Finds an enrollment by id.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: EnrollmentId) -> Result<Option<Enrollment>> {
        self.find_by_id_impl(&*self.pool, id).await
    }

    /// Finds an enrollment by id within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: EnrollmentId,
    ) -> Result<Option<Enrollment>> {
        self.find_by_id_impl(&mut **tx, id).await
    }

    async fn find_by_id_impl<'e, E>(
        &self,
        executor: E,
        id: EnrollmentId,
    ) -> Result<Option<Enrollment>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let query = format!("SELECT {COLUMNS} FROM enrollments WHERE id = ?");
        let enrollment =
            sqlx::query_as::<_, Enrollment>(&query).bind(id).fetch_optional(executor).await?;

        Ok(enrollment)
    }

    /// Lists enrollments with `status`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn list_by_status(&self, status: EnrollmentStatus) -> Result<Vec<Enrollment>> {
        let query = format!("SELECT {COLUMNS} FROM enrollments WHERE status = ? ORDER BY id ASC");
        let enrollments =
            sqlx::query_as::<_, Enrollment>(&query).bind(status).fetch_all(&*self.pool).await?;

        Ok(enrollments)
    }

    /// Enrollments currently receiving messages.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn active(&self) -> Result<Vec<Enrollment>> {
        self.list_by_status(EnrollmentStatus::Active).await
    }

    /// Enrollments that reached the end of their stream.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn completed(&self) -> Result<Vec<Enrollment>> {
        self.list_by_status(EnrollmentStatus::Completed).await
    }

    /// Enrollments that were cancelled.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn cancelled(&self) -> Result<Vec<Enrollment>> {
        self.list_by_status(EnrollmentStatus::Cancelled).await
    }

    /// Sorted distinct languages of messages in streams that have at least
    /// one enrollment.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn supported_languages(&self) -> Result<Vec<String>> {
        let languages = sqlx::query_scalar::<_, String>(
            r"
            SELECT DISTINCT m.language FROM messages m
            WHERE m.message_stream_id IN (SELECT message_stream_id FROM enrollments)
            ORDER BY m.language ASC
            ",
        )
        .fetch_all(&*self.pool)
        .await?;

        Ok(languages)
    }

    /// Returns true if another ACTIVE enrollment holds `phone_number` in the
    /// stream.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn has_active_conflict_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        enrollment: &Enrollment,
    ) -> Result<bool> {
        Self::active_conflict_impl(
            &mut **tx,
            &enrollment.phone_number,
            enrollment.message_stream_id,
            Some(enrollment.id),
        )
        .await
    }

    async fn active_conflict_impl<'e, E>(
        executor: E,
        phone_number: &str,
        stream_id: MessageStreamId,
        exclude: Option<EnrollmentId>,
    ) -> Result<bool>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let conflict = sqlx::query_scalar(
            r"
            SELECT EXISTS (
                SELECT 1 FROM enrollments
                WHERE phone_number = ? AND message_stream_id = ? AND status = 'ACTIVE'
                  AND (? IS NULL OR id <> ?)
            )
            ",
        )
        .bind(phone_number)
        .bind(stream_id)
        .bind(exclude)
        .bind(exclude)
        .fetch_one(executor)
        .await?;

        Ok(conflict)
    }

    /// Writes a new status within a transaction and returns the updated row.
    ///
    /// Side effects of the transition belong to the caller.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for an unknown id and
    /// `CoreError::Validation` if reactivation collides with another ACTIVE
    /// enrollment.
    pub async fn update_status_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: EnrollmentId,
        status: EnrollmentStatus,
    ) -> Result<Enrollment> {
        let query = format!(
            "UPDATE enrollments SET status = ?, updated_at = ? WHERE id = ? RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Enrollment>(&query)
            .bind(status)
            .bind(self.clock.now_utc())
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(translate_conflict)?
            .ok_or_else(|| CoreError::NotFound(format!("enrollment {id}")))
    }
}

/// Maps a violated enrollment index to the matching base error.
fn translate_conflict(err: sqlx::Error) -> CoreError {
    match unique_violation(&err) {
        Some(message) if message.contains("enrollments.ext_user_id") => {
            ValidationErrors::base(EXT_USER_CONFLICT).into()
        },
        Some(message) if message.contains("enrollments.phone_number") => {
            ValidationErrors::base(ACTIVE_CONFLICT).into()
        },
        _ => err.into(),
    }
}
