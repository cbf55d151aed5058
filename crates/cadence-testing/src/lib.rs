//! Test infrastructure for Cadence.
//!
//! [`TestEnv`] wires a migrated SQLite database, a deterministic clock and a
//! scheduler together. The database is in memory unless a test needs several
//! connections writing at once, see [`TestEnv::on_file`]. The fixture builders in [`fixtures`]
//! create streams, messages and enrollments with sensible defaults so tests
//! only spell out what they care about.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use anyhow::{Context, Result};
use cadence_core::{
    storage::{self, PoolConfig},
    Enrollment, Message, MessageStream, Notification, NotificationStatus, ScheduleConfig,
    Scheduler, Storage,
};
use chrono::{DateTime, NaiveDate, Utc};
use tempfile::TempDir;

pub mod fixtures;

pub use cadence_core::TestClock;
pub use fixtures::{EnrollmentBuilder, MessageBuilder, StreamBuilder};

/// Isolated environment backed by a private database.
pub struct TestEnv {
    /// Deterministic clock shared with storage and the scheduler.
    pub clock: TestClock,
    storage: Arc<Storage>,
    scheduler: Scheduler,
    sequence: AtomicU64,
    // Deleted with the environment.
    _dir: Option<TempDir>,
}

impl TestEnv {
    /// Date every environment starts on unless told otherwise.
    pub const DEFAULT_TODAY: (i32, u32, u32) = (2024, 6, 15);

    /// Pool size of a file-backed environment.
    pub const FILE_POOL_CONNECTIONS: u32 = 16;

    /// Creates an environment whose clock reads [`Self::DEFAULT_TODAY`].
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened or migrated.
    pub async fn new() -> Result<Self> {
        Self::on_date(Self::default_today()?).await
    }

    /// Creates an environment over a WAL database file in a private temporary
    /// directory, pooled over [`Self::FILE_POOL_CONNECTIONS`] connections.
    ///
    /// The in-memory database runs on a single connection; this one lets
    /// concurrent transactions actually contend for the write lock.
    ///
    /// # Errors
    ///
    /// Returns error if the directory or database cannot be created.
    pub async fn on_file() -> Result<Self> {
        let dir = tempfile::tempdir().context("failed to create database directory")?;
        let pool_config = PoolConfig {
            url: format!("sqlite://{}", dir.path().join("cadence.db").display()),
            max_connections: Self::FILE_POOL_CONNECTIONS,
            ..PoolConfig::default()
        };
        Self::open(Self::default_today()?, ScheduleConfig::default(), &pool_config, Some(dir)).await
    }

    /// Creates an environment whose clock reads `today`.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened or migrated.
    pub async fn on_date(today: NaiveDate) -> Result<Self> {
        Self::with_config(today, ScheduleConfig::default()).await
    }

    /// Creates an environment with custom scheduling parameters.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened or migrated.
    pub async fn with_config(today: NaiveDate, config: ScheduleConfig) -> Result<Self> {
        let pool_config =
            PoolConfig { url: "sqlite::memory:".to_string(), ..PoolConfig::default() };
        Self::open(today, config, &pool_config, None).await
    }

    async fn open(
        today: NaiveDate,
        config: ScheduleConfig,
        pool_config: &PoolConfig,
        dir: Option<TempDir>,
    ) -> Result<Self> {
        let clock = TestClock::on_date(today);
        let pool = storage::connect(pool_config).await.context("failed to open test database")?;

        let storage = Arc::new(Storage::new(pool, Arc::new(clock.clone())));
        storage.migrate().await.context("failed to migrate test database")?;
        let scheduler = Scheduler::new(storage.clone(), Arc::new(clock.clone()), config);

        Ok(Self { clock, storage, scheduler, sequence: AtomicU64::new(0), _dir: dir })
    }

    fn default_today() -> Result<NaiveDate> {
        let (y, m, d) = Self::DEFAULT_TODAY;
        NaiveDate::from_ymd_opt(y, m, d).context("invalid default date")
    }

    /// Repository access.
    pub fn storage(&self) -> Arc<Storage> {
        self.storage.clone()
    }

    /// Scheduler bound to this environment's clock.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The clock's current date.
    pub fn today(&self) -> NaiveDate {
        cadence_core::Clock::today(&self.clock)
    }

    /// The clock's current instant.
    pub fn now(&self) -> DateTime<Utc> {
        cadence_core::Clock::now_utc(&self.clock)
    }

    /// `today` shifted by `days`, which may be negative.
    pub fn days_from_today(&self, days: i64) -> NaiveDate {
        self.today() + chrono::TimeDelta::days(days)
    }

    /// Next value of a per-environment counter, starting at 1.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Starts a stream builder.
    pub fn stream(&self) -> StreamBuilder<'_> {
        StreamBuilder::new(self)
    }

    /// Starts a builder for a message in `stream`.
    pub fn message(&self, stream: &MessageStream) -> MessageBuilder<'_> {
        MessageBuilder::new(self, stream.id)
    }

    /// Starts a builder for an enrollment in `stream`.
    pub fn enrollment(&self, stream: &MessageStream) -> EnrollmentBuilder<'_> {
        EnrollmentBuilder::new(self, stream.id)
    }

    /// Creates messages at each of `offsets` in `stream`.
    ///
    /// # Errors
    ///
    /// Returns error if a message cannot be created.
    pub async fn messages_at(
        &self,
        stream: &MessageStream,
        offsets: impl IntoIterator<Item = i32>,
    ) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        for offset in offsets {
            messages.push(self.message(stream).offset_days(offset).create().await?);
        }
        Ok(messages)
    }

    /// Creates a notification with an explicit status, bypassing the window.
    ///
    /// # Errors
    ///
    /// Returns error if the notification cannot be created.
    pub async fn notification(
        &self,
        enrollment: &Enrollment,
        message: &Message,
        status: &str,
    ) -> Result<Notification> {
        self.scheduler
            .create_notification(enrollment, message, NotificationStatus::new(status))
            .await
            .context("failed to create notification")
    }

    /// Reloads a notification by id.
    ///
    /// # Errors
    ///
    /// Returns error if the notification does not exist.
    pub async fn reload_notification(&self, notification: &Notification) -> Result<Notification> {
        self.storage
            .notifications
            .find_by_id(notification.id)
            .await?
            .with_context(|| format!("notification {} disappeared", notification.id))
    }

    /// Reloads an enrollment by id.
    ///
    /// # Errors
    ///
    /// Returns error if the enrollment does not exist.
    pub async fn reload_enrollment(&self, enrollment: &Enrollment) -> Result<Enrollment> {
        self.storage
            .enrollments
            .find_by_id(enrollment.id)
            .await?
            .with_context(|| format!("enrollment {} disappeared", enrollment.id))
    }
}
