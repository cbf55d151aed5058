//! Core domain for the Cadence notification scheduler.
//!
//! Holds the domain models, validation, the notifiable-window arithmetic,
//! update derivation, the SQLite repositories and the [`Scheduler`] that
//! ties them together. The hub and API crates build on these types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod schedule;
pub mod scheduler;
pub mod snapshot;
pub mod storage;
pub mod time;
pub mod validation;

pub use error::{CoreError, Result};
pub use models::{
    Enrollment, EnrollmentId, EnrollmentStatus, Message, MessageId, MessageStream,
    MessageStreamId, NewEnrollment, NewMessage, NewMessageStream, NewNotificationResponse,
    NewNotificationUpdate, Notification, NotificationId, NotificationResponse,
    NotificationResponseId, NotificationStatus, NotificationUpdate, NotificationUpdateId,
    UpdateAction, Variables,
};
pub use schedule::ScheduleConfig;
pub use scheduler::{EnqueueSummary, Scheduler, Transition};
pub use snapshot::{derive_from, DerivedFields, NotificationContext};
pub use storage::{PoolConfig, Storage};
pub use time::{Clock, RealClock, TestClock};
pub use validation::ValidationErrors;

/// JSON column wrapper used by persisted models.
pub use sqlx::types::Json;
