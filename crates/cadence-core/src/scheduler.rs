//! Enrollment scheduling and lifecycle.
//!
//! Operations here span several tables and always run in a single
//! transaction: a notification is never visible without its CREATE update,
//! and a cancelled enrollment never leaves an ACTIVE notification behind.

use std::sync::Arc;

use sqlx::{Sqlite, Transaction};
use tracing::{debug, info, instrument, warn};

use crate::{
    error::{CoreError, Result},
    models::{
        Enrollment, EnrollmentId, EnrollmentStatus, Message, MessageStream, NewNotificationUpdate,
        Notification, NotificationId, NotificationStatus, NotificationUpdate, UpdateAction,
    },
    schedule::ScheduleConfig,
    snapshot::derive_from,
    storage::{enrollments::ACTIVE_CONFLICT, notifications::NewNotification, Storage},
    time::Clock,
    validation::ValidationErrors,
};

/// Result of an enrollment status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// The enrollment after the change.
    pub enrollment: Enrollment,
    /// Notifications cancelled by the change, in ascending id order.
    pub cancelled: Vec<NotificationId>,
}

/// Totals from one pass over every active enrollment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueSummary {
    /// Enrollments visited.
    pub enrollments: usize,
    /// Notifications created.
    pub created: usize,
    /// Enrollments whose enqueue failed.
    pub failed: usize,
}

/// Creates notifications as messages become due and applies enrollment
/// status changes.
#[derive(Clone)]
pub struct Scheduler {
    storage: Arc<Storage>,
    clock: Arc<dyn Clock>,
    config: ScheduleConfig,
}

impl Scheduler {
    /// Creates a scheduler over `storage`.
    pub fn new(storage: Arc<Storage>, clock: Arc<dyn Clock>, config: ScheduleConfig) -> Self {
        Self { storage, clock, config }
    }

    /// The window and expiry settings in use.
    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    /// Messages due within the notifiable window that have no notification
    /// for `enrollment` yet, by ascending offset. Empty unless the enrollment
    /// is ACTIVE.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn ready_messages(&self, enrollment: &Enrollment) -> Result<Vec<Message>> {
        if !enrollment.is_active() {
            return Ok(Vec::new());
        }

        let offsets = self.config.ready_offsets(enrollment.stream_start, self.clock.today());
        self.storage
            .messages
            .unscheduled(enrollment.message_stream_id, enrollment.id, offsets)
            .await
    }

    /// Creates an ACTIVE notification, plus its CREATE update, for every
    /// ready message. Safe to repeat and to run concurrently: a message is
    /// instantiated at most once per enrollment.
    ///
    /// # Errors
    ///
    /// Returns error if a query fails; nothing is written in that case.
    #[instrument(
        name = "enqueue_ready_messages",
        skip(self, enrollment),
        fields(enrollment_id = %enrollment.id)
    )]
    pub async fn enqueue_ready_messages(&self, enrollment: &Enrollment) -> Result<Vec<Notification>> {
        if !enrollment.is_active() {
            return Ok(Vec::new());
        }

        let mut tx = self.storage.begin_write().await?;

        // Status may have changed since the caller loaded the row.
        let Some(current) = self.storage.enrollments.find_by_id_in_tx(&mut tx, enrollment.id).await?
        else {
            return Err(CoreError::NotFound(format!("enrollment {}", enrollment.id)));
        };
        if !current.is_active() {
            return Ok(Vec::new());
        }

        let offsets = self.config.ready_offsets(current.stream_start, self.clock.today());
        let ready = self
            .storage
            .messages
            .unscheduled_in_tx(&mut tx, current.message_stream_id, current.id, offsets)
            .await?;
        if ready.is_empty() {
            return Ok(Vec::new());
        }

        let stream = self.stream_in_tx(&mut tx, &current).await?;
        let mut created = Vec::with_capacity(ready.len());
        for message in &ready {
            let Some(delivery_start) = message.due_date(current.stream_start) else {
                warn!(message_id = %message.id, "due date out of range, skipping");
                continue;
            };
            let draft = NewNotification {
                enrollment_id: current.id,
                message_id: message.id,
                status: NotificationStatus::active(),
                delivery_start,
            };
            if let Some(notification) =
                self.storage.notifications.create_if_absent_in_tx(&mut tx, &draft).await?
            {
                self.queue_derived_in_tx(
                    &mut tx,
                    &notification,
                    &current,
                    message,
                    &stream,
                    UpdateAction::Create,
                )
                .await?;
                created.push(notification);
            }
        }

        tx.commit().await?;

        if !created.is_empty() {
            info!(count = created.len(), "notifications enqueued");
        }
        Ok(created)
    }

    /// Runs [`Self::enqueue_ready_messages`] for every ACTIVE enrollment.
    ///
    /// A failure for one enrollment is logged and counted; the pass carries
    /// on with the rest.
    ///
    /// # Errors
    ///
    /// Returns error only if the active enrollments cannot be listed.
    #[instrument(name = "enqueue_all_active", skip(self))]
    pub async fn enqueue_all_active(&self) -> Result<EnqueueSummary> {
        let enrollments = self.storage.enrollments.active().await?;
        let mut summary = EnqueueSummary { enrollments: enrollments.len(), ..EnqueueSummary::default() };

        for enrollment in &enrollments {
            match self.enqueue_ready_messages(enrollment).await {
                Ok(created) => summary.created += created.len(),
                Err(e) => {
                    summary.failed += 1;
                    warn!(enrollment_id = %enrollment.id, error = %e, "enqueue failed");
                },
            }
        }

        debug!(?summary, "enqueue pass finished");
        Ok(summary)
    }

    /// Creates a notification for `message` with an explicit status and
    /// queues its first update. A CANCELLED status queues CANCEL instead of
    /// CREATE.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` if the message is already scheduled
    /// for the enrollment, and `CoreError::InvalidInput` if its due date is
    /// out of range.
    pub async fn create_notification(
        &self,
        enrollment: &Enrollment,
        message: &Message,
        status: NotificationStatus,
    ) -> Result<Notification> {
        let delivery_start = message.due_date(enrollment.stream_start).ok_or_else(|| {
            CoreError::InvalidInput(format!("due date of message {} is out of range", message.id))
        })?;

        let mut tx = self.storage.begin_write().await?;
        let stream = self.stream_in_tx(&mut tx, enrollment).await?;
        let draft = NewNotification {
            enrollment_id: enrollment.id,
            message_id: message.id,
            status,
            delivery_start,
        };
        let notification = self.storage.notifications.create_in_tx(&mut tx, &draft).await?;
        self.queue_derived_in_tx(
            &mut tx,
            &notification,
            enrollment,
            message,
            &stream,
            UpdateAction::Create,
        )
        .await?;
        tx.commit().await?;

        Ok(notification)
    }

    /// Queues an update for a notification from its current state.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for an unknown notification.
    pub async fn queue_update(
        &self,
        notification_id: NotificationId,
        action: UpdateAction,
    ) -> Result<NotificationUpdate> {
        let mut tx = self.storage.begin_write().await?;
        let update = self.queue_update_in_tx(&mut tx, notification_id, action).await?;
        tx.commit().await?;
        Ok(update)
    }

    /// Changes an enrollment's status.
    ///
    /// Moving to ACTIVE re-checks the one-active-enrollment rule. Moving from
    /// ACTIVE to CANCELLED also cancels every ACTIVE notification and queues
    /// a CANCEL update for each, in the same transaction. Setting the current
    /// status again changes nothing.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for an unknown enrollment and
    /// `CoreError::Validation` if reactivation would break uniqueness.
    #[instrument(
        name = "transition_enrollment",
        skip(self, id, status),
        fields(enrollment_id = %id, to = %status)
    )]
    pub async fn transition(&self, id: EnrollmentId, status: EnrollmentStatus) -> Result<Transition> {
        let mut tx = self.storage.begin_write().await?;

        let Some(current) = self.storage.enrollments.find_by_id_in_tx(&mut tx, id).await? else {
            return Err(CoreError::NotFound(format!("enrollment {id}")));
        };
        if current.status == status {
            return Ok(Transition { enrollment: current, cancelled: Vec::new() });
        }

        if status == EnrollmentStatus::Active
            && self.storage.enrollments.has_active_conflict_in_tx(&mut tx, &current).await?
        {
            return Err(ValidationErrors::base(ACTIVE_CONFLICT).into());
        }

        let enrollment = self.storage.enrollments.update_status_in_tx(&mut tx, id, status).await?;

        let cancelled = if current.is_active() && status == EnrollmentStatus::Cancelled {
            let ids = self.storage.notifications.cancel_active_in_tx(&mut tx, id).await?;
            for notification_id in &ids {
                self.queue_update_in_tx(&mut tx, *notification_id, UpdateAction::Cancel).await?;
            }
            ids
        } else {
            Vec::new()
        };

        tx.commit().await?;

        info!(
            from = %current.status,
            cancelled = cancelled.len(),
            "enrollment status changed"
        );
        Ok(Transition { enrollment, cancelled })
    }

    async fn queue_update_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        notification_id: NotificationId,
        action: UpdateAction,
    ) -> Result<NotificationUpdate> {
        let context = self
            .storage
            .notifications
            .context_in_tx(tx, notification_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("notification {notification_id}")))?;

        let mut draft =
            NewNotificationUpdate { action: Some(action.to_string()), ..NewNotificationUpdate::new() };
        draft.assign_notification(&context, &self.config);
        self.storage.notification_updates.create_in_tx(tx, &draft).await
    }

    async fn queue_derived_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        notification: &Notification,
        enrollment: &Enrollment,
        message: &Message,
        stream: &MessageStream,
        action: UpdateAction,
    ) -> Result<NotificationUpdate> {
        let derived = derive_from(notification, enrollment, message, stream, &self.config);
        let mut draft =
            NewNotificationUpdate { action: Some(action.to_string()), ..NewNotificationUpdate::new() };
        draft.apply(notification.id, derived);
        self.storage.notification_updates.create_in_tx(tx, &draft).await
    }

    async fn stream_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        enrollment: &Enrollment,
    ) -> Result<MessageStream> {
        self.storage
            .message_streams
            .find_by_id_in_tx(tx, enrollment.message_stream_id)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!("message stream {}", enrollment.message_stream_id))
            })
    }
}
