//! Deriving hub-facing update fields from a notification.
//!
//! An update is a self-contained snapshot: the hub never looks up
//! enrollments or messages, so everything it needs is copied in here.

use chrono::NaiveDate;

use crate::{
    models::{
        Enrollment, Message, MessageStream, NewNotificationUpdate, Notification, NotificationId,
        UpdateAction, Variables,
    },
    schedule::ScheduleConfig,
};

/// A notification together with the records its updates are derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationContext {
    /// The notification itself.
    pub notification: Notification,
    /// Its owning enrollment.
    pub enrollment: Enrollment,
    /// The message it instantiates.
    pub message: Message,
    /// The stream that message belongs to.
    pub stream: MessageStream,
}

/// Field values an update takes from its notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedFields {
    /// Recipient first name.
    pub first_name: String,
    /// Recipient phone number.
    pub phone_number: String,
    /// Delivery channel.
    pub delivery_method: String,
    /// `<stream name>/<message name>`.
    pub message_path: String,
    /// Scheduled delivery date.
    pub delivery_date: NaiveDate,
    /// Delivery date plus the message or default expiry.
    pub delivery_expires: NaiveDate,
    /// Preferred delivery time window.
    pub preferred_time: Option<String>,
    /// Identifier in the enrolling system.
    pub ext_user_id: Option<String>,
    /// Template variables.
    pub variables: Variables,
    /// Action the update must carry regardless of what was requested.
    pub forced_action: Option<UpdateAction>,
}

/// Derives update fields from a notification and its related records.
pub fn derive_from(
    notification: &Notification,
    enrollment: &Enrollment,
    message: &Message,
    stream: &MessageStream,
    config: &ScheduleConfig,
) -> DerivedFields {
    let delivery_date = notification.delivery_start;

    DerivedFields {
        first_name: enrollment.first_name.clone(),
        phone_number: enrollment.phone_number.clone(),
        delivery_method: enrollment.delivery_method.clone(),
        message_path: message_path(stream, message),
        delivery_date,
        delivery_expires: config.expires_on(delivery_date, message.expire_days),
        preferred_time: enrollment.preferred_time.clone(),
        ext_user_id: enrollment.ext_user_id.clone(),
        variables: enrollment.variables.0.clone(),
        forced_action: notification.is_cancelled().then_some(UpdateAction::Cancel),
    }
}

/// Locator of a message's content on the hub.
pub fn message_path(stream: &MessageStream, message: &Message) -> String {
    format!("{}/{}", stream.name, message.name)
}

impl NotificationContext {
    /// Derives update fields for this notification.
    pub fn derive(&self, config: &ScheduleConfig) -> DerivedFields {
        derive_from(&self.notification, &self.enrollment, &self.message, &self.stream, config)
    }
}

impl NewNotificationUpdate {
    /// Creates a `CREATE` draft derived from `context`.
    pub fn for_notification(context: &NotificationContext, config: &ScheduleConfig) -> Self {
        let mut update = Self::new();
        update.assign_notification(context, config);
        update
    }

    /// Points this draft at a notification and re-derives every copied field.
    ///
    /// A cancelled notification forces the action to `CANCEL`; otherwise the
    /// current action is kept.
    pub fn assign_notification(&mut self, context: &NotificationContext, config: &ScheduleConfig) {
        self.apply(context.notification.id, context.derive(config));
    }

    /// Applies previously derived fields for notification `id`.
    pub fn apply(&mut self, id: NotificationId, derived: DerivedFields) {
        self.notification_id = Some(id);
        self.first_name = Some(derived.first_name);
        self.phone_number = Some(derived.phone_number);
        self.delivery_method = Some(derived.delivery_method);
        self.message_path = Some(derived.message_path);
        self.delivery_date = Some(derived.delivery_date);
        self.delivery_expires = Some(derived.delivery_expires);
        self.preferred_time = derived.preferred_time;
        self.ext_user_id = derived.ext_user_id;
        self.variables = derived.variables;
        if let Some(action) = derived.forced_action {
            self.action = Some(action.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use sqlx::types::Json;

    use super::*;
    use crate::models::{
        EnrollmentId, EnrollmentStatus, MessageId, MessageStreamId, NotificationStatus,
    };

    fn context(status: &str, expire_days: Option<i32>) -> NotificationContext {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let mut variables = Variables::new();
        variables.insert("clinic".to_string(), "Northside".to_string());

        NotificationContext {
            notification: Notification {
                id: NotificationId(7),
                enrollment_id: EnrollmentId(3),
                message_id: MessageId(5),
                status: NotificationStatus::new(status),
                delivery_start: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
                delivered_at: None,
                created_at: at,
                updated_at: at,
            },
            enrollment: Enrollment {
                id: EnrollmentId(3),
                message_stream_id: MessageStreamId(2),
                first_name: "Ada".to_string(),
                last_name: None,
                phone_number: "+1 555 0100".to_string(),
                ext_user_id: Some("x344493y:4".to_string()),
                delivery_method: "SMS".to_string(),
                stream_start: start,
                preferred_time: Some("10-19".to_string()),
                language: None,
                status: EnrollmentStatus::Active,
                variables: Json(variables),
                created_at: at,
                updated_at: at,
            },
            message: Message {
                id: MessageId(5),
                message_stream_id: MessageStreamId(2),
                name: "week1".to_string(),
                title: "message title".to_string(),
                sms_text: Some("whyamihere".to_string()),
                offset_days: 3,
                language: "en".to_string(),
                expire_days,
                created_at: at,
            },
            stream: MessageStream {
                id: MessageStreamId(2),
                name: "prenatal".to_string(),
                title: "Prenatal".to_string(),
                created_at: at,
            },
        }
    }

    #[test]
    fn assignment_copies_enrollment_and_message_fields() {
        let mut update = NewNotificationUpdate::new();
        update.assign_notification(&context("ACTIVE", None), &ScheduleConfig::default());

        assert_eq!(update.notification_id, Some(NotificationId(7)));
        assert_eq!(update.first_name.as_deref(), Some("Ada"));
        assert_eq!(update.phone_number.as_deref(), Some("+1 555 0100"));
        assert_eq!(update.delivery_method.as_deref(), Some("SMS"));
        assert_eq!(update.message_path.as_deref(), Some("prenatal/week1"));
        assert_eq!(update.delivery_date, NaiveDate::from_ymd_opt(2024, 3, 4));
        assert_eq!(update.preferred_time.as_deref(), Some("10-19"));
        assert_eq!(update.ext_user_id.as_deref(), Some("x344493y:4"));
        assert_eq!(update.variables.get("clinic").map(String::as_str), Some("Northside"));
        assert_eq!(update.action.as_deref(), Some("CREATE"));
    }

    #[test]
    fn custom_expire_days_extend_delivery_date() {
        let config = ScheduleConfig::default();
        let update = NewNotificationUpdate::for_notification(&context("ACTIVE", Some(3)), &config);
        let delivery = update.delivery_date.unwrap();
        assert_eq!(update.delivery_expires, Some(delivery + chrono::TimeDelta::days(3)));
    }

    #[test]
    fn cancelled_notification_forces_cancel() {
        let mut update =
            NewNotificationUpdate { action: Some("UPDATE".to_string()), ..NewNotificationUpdate::new() };
        update.assign_notification(&context("CANCELLED", None), &ScheduleConfig::default());
        assert_eq!(update.action.as_deref(), Some("CANCEL"));
    }

    #[test]
    fn failed_notification_keeps_existing_action() {
        let mut update =
            NewNotificationUpdate { action: Some("UPDATE".to_string()), ..NewNotificationUpdate::new() };
        update.assign_notification(&context("PERM_FAIL", None), &ScheduleConfig::default());
        assert_eq!(update.action.as_deref(), Some("UPDATE"));
    }

    #[test]
    fn reassignment_rederives_fields() {
        let config = ScheduleConfig::default();
        let mut update = NewNotificationUpdate::for_notification(&context("ACTIVE", None), &config);

        let mut other = context("ACTIVE", None);
        other.notification.id = NotificationId(8);
        other.enrollment.first_name = "Grace".to_string();
        update.assign_notification(&other, &config);

        assert_eq!(update.notification_id, Some(NotificationId(8)));
        assert_eq!(update.first_name.as_deref(), Some("Grace"));
    }
}
