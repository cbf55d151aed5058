//! Builders for test records.
//!
//! Each builder starts from defaults that satisfy validation, numbered from
//! the environment's sequence so repeated builds never collide.

use anyhow::{Context, Result};
use cadence_core::{
    Enrollment, EnrollmentStatus, Message, MessageStream, MessageStreamId, NewEnrollment,
    NewMessage, NewMessageStream, Variables,
};
use chrono::NaiveDate;

use crate::TestEnv;

/// Builder for message streams.
pub struct StreamBuilder<'a> {
    env: &'a TestEnv,
    name: String,
    title: String,
}

impl<'a> StreamBuilder<'a> {
    pub(crate) fn new(env: &'a TestEnv) -> Self {
        let n = env.next_sequence();
        Self { env, name: format!("stream{n}"), title: format!("Stream {n}") }
    }

    /// Sets the stream handle.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the title.
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Returns the input without persisting it.
    pub fn build(self) -> NewMessageStream {
        NewMessageStream { name: self.name, title: self.title }
    }

    /// Persists the stream.
    ///
    /// # Errors
    ///
    /// Returns error if the stream is rejected.
    pub async fn create(self) -> Result<MessageStream> {
        let storage = self.env.storage();
        let draft = self.build();
        storage.message_streams.create(&draft).await.context("failed to create stream")
    }
}

/// Builder for messages.
pub struct MessageBuilder<'a> {
    env: &'a TestEnv,
    draft: NewMessage,
}

impl<'a> MessageBuilder<'a> {
    pub(crate) fn new(env: &'a TestEnv, stream_id: MessageStreamId) -> Self {
        let n = env.next_sequence();
        let draft = NewMessage {
            message_stream_id: Some(stream_id),
            name: Some(format!("message{n}")),
            title: Some("message title".to_string()),
            sms_text: Some("whyamihere".to_string()),
            offset_days: Some(0),
            language: None,
            expire_days: None,
        };
        Self { env, draft }
    }

    /// Sets the handle.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.draft.name = Some(name.into());
        self
    }

    /// Sets the day offset from stream start.
    #[must_use]
    pub fn offset_days(mut self, days: i32) -> Self {
        self.draft.offset_days = Some(days);
        self
    }

    /// Sets the language code.
    #[must_use]
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.draft.language = Some(language.into());
        self
    }

    /// Sets a custom expiry.
    #[must_use]
    pub fn expire_days(mut self, days: i32) -> Self {
        self.draft.expire_days = Some(days);
        self
    }

    /// Returns the input without persisting it.
    pub fn build(self) -> NewMessage {
        self.draft
    }

    /// Persists the message.
    ///
    /// # Errors
    ///
    /// Returns error if the message is rejected.
    pub async fn create(self) -> Result<Message> {
        let storage = self.env.storage();
        storage.messages.create(&self.draft).await.context("failed to create message")
    }
}

/// Builder for enrollments.
pub struct EnrollmentBuilder<'a> {
    env: &'a TestEnv,
    draft: NewEnrollment,
}

impl<'a> EnrollmentBuilder<'a> {
    pub(crate) fn new(env: &'a TestEnv, stream_id: MessageStreamId) -> Self {
        let n = env.next_sequence();
        let draft = NewEnrollment {
            message_stream_id: Some(stream_id),
            first_name: Some("Test".to_string()),
            last_name: Some(format!("Recipient{n}")),
            phone_number: Some(format!("+1 (555) 010-{n:04}")),
            delivery_method: Some("SMS".to_string()),
            stream_start: Some(env.today()),
            ..NewEnrollment::new()
        };
        Self { env, draft }
    }

    /// Sets the phone number.
    #[must_use]
    pub fn phone_number(mut self, phone: impl Into<String>) -> Self {
        self.draft.phone_number = Some(phone.into());
        self
    }

    /// Sets the external user id.
    #[must_use]
    pub fn ext_user_id(mut self, id: impl Into<String>) -> Self {
        self.draft.ext_user_id = Some(id.into());
        self
    }

    /// Sets the stream start date.
    #[must_use]
    pub fn stream_start(mut self, date: NaiveDate) -> Self {
        self.draft.stream_start = Some(date);
        self
    }

    /// Sets the stream start relative to the environment's today.
    #[must_use]
    pub fn started_days_ago(mut self, days: i64) -> Self {
        self.draft.stream_start = Some(self.env.days_from_today(-days));
        self
    }

    /// Sets the initial status.
    #[must_use]
    pub fn status(mut self, status: EnrollmentStatus) -> Self {
        self.draft.status = Some(status.to_string());
        self
    }

    /// Sets the preferred delivery window.
    #[must_use]
    pub fn preferred_time(mut self, time: impl Into<String>) -> Self {
        self.draft.preferred_time = Some(time.into());
        self
    }

    /// Adds a template variable.
    #[must_use]
    pub fn variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.draft.variables.insert(key.into(), value.into());
        self
    }

    /// Replaces every template variable.
    #[must_use]
    pub fn variables(mut self, variables: Variables) -> Self {
        self.draft.variables = variables;
        self
    }

    /// Returns the input without persisting it.
    pub fn build(self) -> NewEnrollment {
        self.draft
    }

    /// Persists the enrollment.
    ///
    /// # Errors
    ///
    /// Returns error if the enrollment is rejected.
    pub async fn create(self) -> Result<Enrollment> {
        let storage = self.env.storage();
        storage.enrollments.create(&self.draft).await.context("failed to create enrollment")
    }
}
