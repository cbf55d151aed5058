//! Core domain models and strongly-typed identifiers.
//!
//! Defines message streams, enrollments, notifications and the sync records
//! exchanged with the hub. Persisted rows are plain `FromRow` structs; inbound
//! input arrives as `New*` drafts whose fields are all optional so that
//! validation can report every missing field at once.

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

use crate::validation::{ValidationErrors, NOT_INCLUDED};

/// Free-form key/value pairs attached to enrollments and updates.
pub type Variables = BTreeMap<String, String>;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
            sqlx::Type,
        )]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

id_type!(
    /// Identifier of a [`MessageStream`].
    MessageStreamId
);
id_type!(
    /// Identifier of a [`Message`].
    MessageId
);
id_type!(
    /// Identifier of an [`Enrollment`].
    EnrollmentId
);
id_type!(
    /// Identifier of a [`Notification`].
    NotificationId
);
id_type!(
    /// Identifier of a [`NotificationUpdate`].
    ///
    /// Ids are assigned in creation order, and the hub replays a
    /// notification's history by walking its updates in ascending id order.
    NotificationUpdateId
);
id_type!(
    /// Identifier of a [`NotificationResponse`].
    NotificationResponseId
);

/// Ordered collection of messages defining a recipient timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MessageStream {
    /// Unique identifier.
    pub id: MessageStreamId,
    /// Short unique handle, used as the first segment of message paths.
    pub name: String,
    /// Human-readable title.
    pub title: String,
    /// When the stream was created.
    pub created_at: DateTime<Utc>,
}

/// Template entry scheduled at a day offset within a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    /// Unique identifier.
    pub id: MessageId,
    /// Owning stream.
    pub message_stream_id: MessageStreamId,
    /// Handle unique within the stream.
    pub name: String,
    /// Message title.
    pub title: String,
    /// SMS body content.
    pub sms_text: Option<String>,
    /// Days after the enrollment's stream start; may be negative.
    pub offset_days: i32,
    /// Language code of the content.
    pub language: String,
    /// Days the message stays deliverable; `None` uses the configured default.
    pub expire_days: Option<i32>,
    /// When the message was created.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Date on which this message is due for an enrollment starting on
    /// `stream_start`.
    pub fn due_date(&self, stream_start: NaiveDate) -> Option<NaiveDate> {
        stream_start.checked_add_signed(chrono::TimeDelta::days(i64::from(self.offset_days)))
    }
}

/// Lifecycle status of an enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    /// Receiving messages.
    Active,
    /// Reached the end of its stream.
    Completed,
    /// Stopped; outstanding notifications were cancelled.
    Cancelled,
}

impl EnrollmentStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 3] = [Self::Active, Self::Completed, Self::Cancelled];

    /// Database and wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl Default for EnrollmentStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnrollmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown enrollment status: {s}"))
    }
}

/// A recipient bound to a message stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Enrollment {
    /// Unique identifier.
    pub id: EnrollmentId,
    /// Stream the recipient follows.
    pub message_stream_id: MessageStreamId,
    /// Recipient first name.
    pub first_name: String,
    /// Recipient last name.
    pub last_name: Option<String>,
    /// Phone number exactly as supplied, symbols included.
    pub phone_number: String,
    /// Identifier in the enrolling system, unique per stream when present.
    pub ext_user_id: Option<String>,
    /// Channel used for delivery, e.g. `SMS` or `IVR`.
    pub delivery_method: String,
    /// Anchor date for message offsets.
    pub stream_start: NaiveDate,
    /// Preferred delivery time window.
    pub preferred_time: Option<String>,
    /// Preferred language.
    pub language: Option<String>,
    /// Lifecycle status.
    pub status: EnrollmentStatus,
    /// Template variables forwarded with every update.
    pub variables: Json<Variables>,
    /// When the enrollment was created.
    pub created_at: DateTime<Utc>,
    /// When the enrollment was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Enrollment {
    /// Returns true if the enrollment is receiving messages.
    pub fn is_active(&self) -> bool {
        self.status == EnrollmentStatus::Active
    }
}

/// Enrollment input prior to validation.
///
/// Unset fields, including those missing from a deserialized body, take the
/// [`Default`] values: status `ACTIVE`, everything else empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NewEnrollment {
    /// Stream to enroll in.
    pub message_stream_id: Option<MessageStreamId>,
    /// Recipient first name.
    pub first_name: Option<String>,
    /// Recipient last name.
    pub last_name: Option<String>,
    /// Recipient phone number.
    pub phone_number: Option<String>,
    /// Identifier in the enrolling system.
    pub ext_user_id: Option<String>,
    /// Delivery channel.
    pub delivery_method: Option<String>,
    /// Anchor date for message offsets.
    pub stream_start: Option<NaiveDate>,
    /// Preferred delivery time window.
    pub preferred_time: Option<String>,
    /// Preferred language.
    pub language: Option<String>,
    /// Status name; defaults to `ACTIVE`.
    pub status: Option<String>,
    /// Template variables.
    pub variables: Variables,
}

impl Default for NewEnrollment {
    fn default() -> Self {
        Self {
            message_stream_id: None,
            first_name: None,
            last_name: None,
            phone_number: None,
            ext_user_id: None,
            delivery_method: None,
            stream_start: None,
            preferred_time: None,
            language: None,
            status: Some(EnrollmentStatus::Active.to_string()),
            variables: Variables::new(),
        }
    }
}

impl NewEnrollment {
    /// Creates an empty draft whose status defaults to `ACTIVE`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks field-level rules and returns the normalized record.
    ///
    /// Uniqueness rules need the database and are enforced by the repository.
    ///
    /// # Errors
    ///
    /// Returns every field-level problem found.
    pub fn validate(&self) -> Result<ValidEnrollment, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.require_str("first_name", self.first_name.as_deref());
        errors.require_str("phone_number", self.phone_number.as_deref());
        errors.require_str("delivery_method", self.delivery_method.as_deref());
        errors.require("stream_start", self.stream_start.as_ref());
        errors.require("message_stream_id", self.message_stream_id.as_ref());
        errors.require_str("status", self.status.as_deref());

        let status = match self.status.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => match s.parse::<EnrollmentStatus>() {
                Ok(status) => Some(status),
                Err(_) => {
                    errors.add("status", NOT_INCLUDED);
                    None
                },
            },
            _ => None,
        };

        match (
            self.message_stream_id,
            &self.first_name,
            &self.phone_number,
            &self.delivery_method,
            self.stream_start,
            status,
        ) {
            (
                Some(message_stream_id),
                Some(first_name),
                Some(phone_number),
                Some(delivery_method),
                Some(stream_start),
                Some(status),
            ) if errors.is_empty() => Ok(ValidEnrollment {
                message_stream_id,
                first_name: first_name.clone(),
                last_name: self.last_name.clone(),
                phone_number: phone_number.clone(),
                ext_user_id: self.ext_user_id.clone().filter(|id| !id.trim().is_empty()),
                delivery_method: delivery_method.clone(),
                stream_start,
                preferred_time: self.preferred_time.clone(),
                language: self.language.clone(),
                status,
                variables: self.variables.clone(),
            }),
            _ => Err(errors),
        }
    }
}

/// Enrollment that passed field-level validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidEnrollment {
    /// Stream to enroll in.
    pub message_stream_id: MessageStreamId,
    /// Recipient first name.
    pub first_name: String,
    /// Recipient last name.
    pub last_name: Option<String>,
    /// Recipient phone number.
    pub phone_number: String,
    /// Identifier in the enrolling system; blank input is dropped.
    pub ext_user_id: Option<String>,
    /// Delivery channel.
    pub delivery_method: String,
    /// Anchor date for message offsets.
    pub stream_start: NaiveDate,
    /// Preferred delivery time window.
    pub preferred_time: Option<String>,
    /// Preferred language.
    pub language: Option<String>,
    /// Initial status.
    pub status: EnrollmentStatus,
    /// Template variables.
    pub variables: Variables,
}

/// Delivery status of a notification.
///
/// Open set: the hub may report statuses this crate has never seen, and they
/// are stored as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct NotificationStatus(pub String);

impl NotificationStatus {
    /// Awaiting delivery.
    pub const ACTIVE: &'static str = "ACTIVE";
    /// Delivered to the recipient.
    pub const DELIVERED: &'static str = "DELIVERED";
    /// Withdrawn before delivery.
    pub const CANCELLED: &'static str = "CANCELLED";
    /// Delivery failed permanently.
    pub const PERM_FAIL: &'static str = "PERM_FAIL";

    /// Wraps any status string.
    pub fn new(status: impl Into<String>) -> Self {
        Self(status.into())
    }

    /// The initial status.
    pub fn active() -> Self {
        Self::new(Self::ACTIVE)
    }

    /// The cancelled status.
    pub fn cancelled() -> Self {
        Self::new(Self::CANCELLED)
    }

    /// Raw status string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for the initial, still-deliverable status.
    pub fn is_active(&self) -> bool {
        self.0 == Self::ACTIVE
    }

    /// Returns true for the cancelled status.
    pub fn is_cancelled(&self) -> bool {
        self.0 == Self::CANCELLED
    }
}

impl Default for NotificationStatus {
    fn default() -> Self {
        Self::active()
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NotificationStatus {
    fn from(status: &str) -> Self {
        Self::new(status)
    }
}

/// One scheduled instance of a message for an enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    /// Unique identifier.
    pub id: NotificationId,
    /// Owning enrollment.
    pub enrollment_id: EnrollmentId,
    /// Message this notification instantiates.
    pub message_id: MessageId,
    /// Delivery status.
    pub status: NotificationStatus,
    /// Scheduled delivery date.
    pub delivery_start: NaiveDate,
    /// When the hub reported delivery.
    pub delivered_at: Option<DateTime<Utc>>,
    /// When the notification was created.
    pub created_at: DateTime<Utc>,
    /// When the notification was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// Returns true if the notification was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.status.is_cancelled()
    }
}

/// Kind of change an update describes to the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateAction {
    /// Schedule a new delivery.
    Create,
    /// Change a scheduled delivery.
    Update,
    /// Withdraw a scheduled delivery.
    Cancel,
}

impl UpdateAction {
    /// Every action.
    pub const ALL: [Self; 3] = [Self::Create, Self::Update, Self::Cancel];

    /// Database and wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Cancel => "CANCEL",
        }
    }
}

impl fmt::Display for UpdateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| format!("unknown update action: {s}"))
    }
}

/// Outbound snapshot of a notification queued for hub upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationUpdate {
    /// Unique identifier; ascending in creation order.
    pub id: NotificationUpdateId,
    /// Source notification.
    pub notification_id: NotificationId,
    /// Recipient first name.
    pub first_name: String,
    /// Recipient phone number.
    pub phone_number: String,
    /// Delivery channel.
    pub delivery_method: String,
    /// Locator of the message content.
    pub message_path: String,
    /// Scheduled delivery date.
    pub delivery_date: NaiveDate,
    /// Last date the delivery is still useful.
    pub delivery_expires: Option<NaiveDate>,
    /// Preferred delivery time window.
    pub preferred_time: Option<String>,
    /// Identifier in the enrolling system.
    pub ext_user_id: Option<String>,
    /// Kind of change.
    pub action: UpdateAction,
    /// HTTP status returned by the hub for the upload.
    pub response_code: Option<i32>,
    /// When the hub accepted this update; `None` while pending.
    pub uploaded_at: Option<DateTime<Utc>>,
    /// Template variables.
    pub variables: Json<Variables>,
    /// When the update was created.
    pub created_at: DateTime<Utc>,
}

impl NotificationUpdate {
    /// Returns true while the update still awaits upload.
    pub fn is_pending(&self) -> bool {
        self.uploaded_at.is_none()
    }
}

/// Update input prior to validation.
///
/// Use [`NewNotificationUpdate::assign_notification`] to fill the derived
/// fields from a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewNotificationUpdate {
    /// Explicit id; assigned by the database when `None`.
    pub id: Option<NotificationUpdateId>,
    /// Source notification.
    pub notification_id: Option<NotificationId>,
    /// Recipient first name.
    pub first_name: Option<String>,
    /// Recipient phone number.
    pub phone_number: Option<String>,
    /// Delivery channel.
    pub delivery_method: Option<String>,
    /// Locator of the message content.
    pub message_path: Option<String>,
    /// Scheduled delivery date.
    pub delivery_date: Option<NaiveDate>,
    /// Last date the delivery is still useful.
    pub delivery_expires: Option<NaiveDate>,
    /// Preferred delivery time window.
    pub preferred_time: Option<String>,
    /// Identifier in the enrolling system.
    pub ext_user_id: Option<String>,
    /// Action name; defaults to `CREATE`.
    pub action: Option<String>,
    /// HTTP status returned by the hub.
    pub response_code: Option<i32>,
    /// Upload timestamp.
    pub uploaded_at: Option<DateTime<Utc>>,
    /// Template variables.
    pub variables: Variables,
}

impl Default for NewNotificationUpdate {
    fn default() -> Self {
        Self {
            id: None,
            notification_id: None,
            first_name: None,
            phone_number: None,
            delivery_method: None,
            message_path: None,
            delivery_date: None,
            delivery_expires: None,
            preferred_time: None,
            ext_user_id: None,
            action: Some(UpdateAction::Create.to_string()),
            response_code: None,
            uploaded_at: None,
            variables: Variables::new(),
        }
    }
}

impl NewNotificationUpdate {
    /// Creates an empty draft whose action defaults to `CREATE`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks field-level rules and returns the normalized record.
    ///
    /// # Errors
    ///
    /// Returns every field-level problem found.
    pub fn validate(&self) -> Result<ValidNotificationUpdate, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.require("notification_id", self.notification_id.as_ref());
        errors.require_str("first_name", self.first_name.as_deref());
        errors.require_str("phone_number", self.phone_number.as_deref());
        errors.require_str("delivery_method", self.delivery_method.as_deref());
        errors.require_str("message_path", self.message_path.as_deref());
        errors.require("delivery_date", self.delivery_date.as_ref());
        errors.require_str("action", self.action.as_deref());

        let action = match self.action.as_deref().map(str::trim) {
            Some(a) if !a.is_empty() => match a.parse::<UpdateAction>() {
                Ok(action) => Some(action),
                Err(_) => {
                    errors.add("action", NOT_INCLUDED);
                    None
                },
            },
            _ => None,
        };

        match (
            self.notification_id,
            &self.first_name,
            &self.phone_number,
            &self.delivery_method,
            &self.message_path,
            self.delivery_date,
            action,
        ) {
            (
                Some(notification_id),
                Some(first_name),
                Some(phone_number),
                Some(delivery_method),
                Some(message_path),
                Some(delivery_date),
                Some(action),
            ) if errors.is_empty() => Ok(ValidNotificationUpdate {
                id: self.id,
                notification_id,
                first_name: first_name.clone(),
                phone_number: phone_number.clone(),
                delivery_method: delivery_method.clone(),
                message_path: message_path.clone(),
                delivery_date,
                delivery_expires: self.delivery_expires,
                preferred_time: self.preferred_time.clone(),
                ext_user_id: self.ext_user_id.clone(),
                action,
                response_code: self.response_code,
                uploaded_at: self.uploaded_at,
                variables: self.variables.clone(),
            }),
            _ => Err(errors),
        }
    }
}

/// Update that passed field-level validation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct ValidNotificationUpdate {
    pub id: Option<NotificationUpdateId>,
    pub notification_id: NotificationId,
    pub first_name: String,
    pub phone_number: String,
    pub delivery_method: String,
    pub message_path: String,
    pub delivery_date: NaiveDate,
    pub delivery_expires: Option<NaiveDate>,
    pub preferred_time: Option<String>,
    pub ext_user_id: Option<String>,
    pub action: UpdateAction,
    pub response_code: Option<i32>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub variables: Variables,
}

/// Inbound delivery result reported by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationResponse {
    /// Unique identifier.
    pub id: NotificationResponseId,
    /// Notification the result applies to.
    pub notification_id: NotificationId,
    /// Reported status, stored verbatim.
    pub status: NotificationStatus,
    /// Provider error category.
    pub error_type: Option<String>,
    /// Provider error detail.
    pub error_msg: Option<String>,
    /// When delivery happened.
    pub delivered_at: Option<DateTime<Utc>>,
    /// When the response was received.
    pub created_at: DateTime<Utc>,
}

/// Response input prior to validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewNotificationResponse {
    /// Notification the result applies to.
    pub notification_id: Option<NotificationId>,
    /// Reported status; any non-blank value is accepted.
    pub status: Option<String>,
    /// Provider error category.
    pub error_type: Option<String>,
    /// Provider error detail.
    pub error_msg: Option<String>,
    /// When delivery happened.
    pub delivered_at: Option<DateTime<Utc>>,
}

impl NewNotificationResponse {
    /// Checks presence of the notification reference and status.
    ///
    /// # Errors
    ///
    /// Returns the missing fields.
    pub fn validate(&self) -> Result<(NotificationId, NotificationStatus), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.require("notification", self.notification_id.as_ref());
        errors.require_str("status", self.status.as_deref());

        match (self.notification_id, &self.status) {
            (Some(id), Some(status)) if errors.is_empty() => {
                Ok((id, NotificationStatus::new(status.trim())))
            },
            _ => Err(errors),
        }
    }
}

/// Stream input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessageStream {
    /// Short unique handle.
    pub name: String,
    /// Human-readable title.
    pub title: String,
}

/// Message input. Unset optional fields take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewMessage {
    /// Owning stream.
    pub message_stream_id: Option<MessageStreamId>,
    /// Handle unique within the stream.
    pub name: Option<String>,
    /// Message title.
    pub title: Option<String>,
    /// SMS body.
    pub sms_text: Option<String>,
    /// Days after stream start; defaults to 0.
    pub offset_days: Option<i32>,
    /// Language code; defaults to `en`.
    pub language: Option<String>,
    /// Custom expiry in days.
    pub expire_days: Option<i32>,
}

impl NewMessage {
    /// Language used when none is given.
    pub const DEFAULT_LANGUAGE: &'static str = "en";

    /// Checks required fields and the expiry bound.
    ///
    /// # Errors
    ///
    /// Returns every problem found.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.require("message_stream_id", self.message_stream_id.as_ref());
        errors.require_str("name", self.name.as_deref());
        errors.require_str("title", self.title.as_deref());
        if self.expire_days.is_some_and(|days| days < 0) {
            errors.add("expire_days", "must be greater than or equal to 0");
        }
        errors.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_enrollment() -> NewEnrollment {
        NewEnrollment {
            message_stream_id: Some(MessageStreamId(1)),
            first_name: Some("Ada".to_string()),
            phone_number: Some("+1 (555) 010-2030".to_string()),
            delivery_method: Some("SMS".to_string()),
            stream_start: NaiveDate::from_ymd_opt(2024, 3, 1),
            ..NewEnrollment::new()
        }
    }

    #[test]
    fn enrollment_status_round_trips_through_str() {
        for status in EnrollmentStatus::ALL {
            assert_eq!(status.as_str().parse::<EnrollmentStatus>(), Ok(status));
        }
        assert!("PAUSED".parse::<EnrollmentStatus>().is_err());
    }

    #[test]
    fn enrollment_defaults_to_active() {
        let valid = complete_enrollment().validate().unwrap();
        assert_eq!(valid.status, EnrollmentStatus::Active);
        assert_eq!(valid.phone_number, "+1 (555) 010-2030");
    }

    #[test]
    fn enrollment_reports_each_missing_field() {
        let errors = NewEnrollment { status: None, ..NewEnrollment::default() }
            .validate()
            .unwrap_err();
        for field in [
            "first_name",
            "phone_number",
            "delivery_method",
            "stream_start",
            "message_stream_id",
            "status",
        ] {
            assert!(errors.has(field), "expected error on {field}");
        }
        assert!(!errors.has("last_name"));
    }

    #[test]
    fn enrollment_rejects_unknown_status() {
        let draft = NewEnrollment { status: Some("PAUSED".to_string()), ..complete_enrollment() };
        let errors = draft.validate().unwrap_err();
        assert_eq!(errors.on("status"), [NOT_INCLUDED]);
    }

    #[test]
    fn blank_ext_user_id_is_dropped() {
        let draft = NewEnrollment { ext_user_id: Some("  ".to_string()), ..complete_enrollment() };
        assert_eq!(draft.validate().unwrap().ext_user_id, None);
    }

    #[test]
    fn notification_status_accepts_unknown_values() {
        let status = NotificationStatus::from("EARTH_NOT_FOUND");
        assert!(!status.is_active());
        assert!(!status.is_cancelled());
        assert_eq!(status.to_string(), "EARTH_NOT_FOUND");
        assert!(NotificationStatus::cancelled().is_cancelled());
        assert!(NotificationStatus::default().is_active());
    }

    #[test]
    fn update_draft_defaults_to_create() {
        assert_eq!(NewNotificationUpdate::new().action.as_deref(), Some("CREATE"));
        assert_eq!(NewNotificationUpdate::default().action.as_deref(), Some("CREATE"));
    }

    #[test]
    fn deserialized_drafts_take_status_and_action_defaults() {
        let enrollment: NewEnrollment = serde_json::from_str(
            r#"{
                "message_stream_id": 1,
                "first_name": "Ada",
                "phone_number": "555-0100",
                "delivery_method": "SMS",
                "stream_start": "2024-03-01"
            }"#,
        )
        .unwrap();
        assert_eq!(enrollment.status.as_deref(), Some("ACTIVE"));
        assert_eq!(enrollment.validate().unwrap().status, EnrollmentStatus::Active);

        let update: NewNotificationUpdate = serde_json::from_str(
            r#"{
                "notification_id": 7,
                "first_name": "Ada",
                "phone_number": "555-0100",
                "delivery_method": "SMS",
                "message_path": "prenatal/week-1",
                "delivery_date": "2024-03-01"
            }"#,
        )
        .unwrap();
        assert_eq!(update.action.as_deref(), Some("CREATE"));
        assert_eq!(update.validate().unwrap().action, UpdateAction::Create);
    }

    #[test]
    fn update_rejects_unknown_action() {
        let draft = NewNotificationUpdate {
            notification_id: Some(NotificationId(1)),
            first_name: Some("Ada".to_string()),
            phone_number: Some("555".to_string()),
            delivery_method: Some("SMS".to_string()),
            message_path: Some("stream/message".to_string()),
            delivery_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            action: Some("DELETE".to_string()),
            ..NewNotificationUpdate::default()
        };
        assert_eq!(draft.validate().unwrap_err().on("action"), [NOT_INCLUDED]);

        let draft = NewNotificationUpdate { action: Some("UPDATE".to_string()), ..draft };
        assert_eq!(draft.validate().unwrap().action, UpdateAction::Update);
    }

    #[test]
    fn update_without_expiry_is_valid() {
        let draft = NewNotificationUpdate {
            notification_id: Some(NotificationId(1)),
            first_name: Some("Ada".to_string()),
            phone_number: Some("555".to_string()),
            delivery_method: Some("SMS".to_string()),
            message_path: Some("stream/message".to_string()),
            delivery_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            delivery_expires: None,
            ..NewNotificationUpdate::new()
        };
        assert!(draft.validate().is_ok());
    }

    #[test]
    fn response_requires_status_and_notification() {
        let errors = NewNotificationResponse::default().validate().unwrap_err();
        assert!(errors.has("status"));
        assert!(errors.has("notification"));

        let ok = NewNotificationResponse {
            notification_id: Some(NotificationId(4)),
            status: Some("EARTH_NOT_FOUND".to_string()),
            ..NewNotificationResponse::default()
        };
        assert_eq!(ok.validate().unwrap().1.as_str(), "EARTH_NOT_FOUND");
    }

    #[test]
    fn message_due_date_handles_negative_offsets() {
        let message = Message {
            id: MessageId(1),
            message_stream_id: MessageStreamId(1),
            name: "message1".to_string(),
            title: "message title".to_string(),
            sms_text: None,
            offset_days: -2,
            language: "en".to_string(),
            expire_days: None,
            created_at: Utc::now(),
        };
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(message.due_date(start), NaiveDate::from_ymd_opt(2024, 2, 28));
    }
}
