//! Database access layer implementing the repository pattern.
//!
//! Each repository owns the SQL for one table. Operations that span tables
//! (enqueueing, cancellation cascades) live in [`crate::scheduler`] and call
//! the `*_in_tx` variants so the whole change commits atomically.

use std::{str::FromStr, sync::Arc, time::Duration};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Sqlite, SqlitePool, Transaction,
};
use tracing::{debug, info};

pub mod enrollments;
pub mod message_streams;
pub mod messages;
pub mod notification_responses;
pub mod notification_updates;
pub mod notifications;
mod schema;

use crate::{error::Result, time::Clock};

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// SQLite URL, e.g. `sqlite://cadence.db` or `sqlite::memory:`.
    pub url: String,
    /// Upper bound on pooled connections.
    pub max_connections: u32,
    /// Connections kept open while idle.
    pub min_connections: u32,
    /// How long to wait for a free connection.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://cadence.db".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

/// Opens a connection pool with foreign keys enforced.
///
/// In-memory databases exist per connection, so they are capped at a single
/// connection that is never recycled.
///
/// # Errors
///
/// Returns error if the URL is malformed or the database cannot be opened.
pub async fn connect(config: &PoolConfig) -> Result<SqlitePool> {
    let in_memory = config.url.contains(":memory:");
    let mut options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let mut pool_options = SqlitePoolOptions::new().acquire_timeout(config.acquire_timeout);
    pool_options = if in_memory {
        pool_options.max_connections(1).min_connections(1).idle_timeout(None).max_lifetime(None)
    } else {
        pool_options.max_connections(config.max_connections).min_connections(config.min_connections)
    };

    let pool = pool_options.connect_with(options).await?;
    debug!(in_memory, "database pool opened");
    Ok(pool)
}

/// Begins a transaction holding the write lock from its first statement.
///
/// Every transaction that reads and then writes goes through here. Competing
/// writers queue on the busy timeout instead of failing with
/// `SQLITE_BUSY_SNAPSHOT` when they try to upgrade a read snapshot.
///
/// # Errors
///
/// Returns `CoreError::Database` if no connection is available or the lock
/// is not granted within the busy timeout.
pub async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

/// Container for all repository instances providing unified database access.
#[derive(Clone)]
pub struct Storage {
    pool: Arc<SqlitePool>,

    /// Repository for message streams.
    pub message_streams: Arc<message_streams::Repository>,

    /// Repository for stream messages.
    pub messages: Arc<messages::Repository>,

    /// Repository for enrollments.
    pub enrollments: Arc<enrollments::Repository>,

    /// Repository for notifications.
    pub notifications: Arc<notifications::Repository>,

    /// Repository for the outbound update queue.
    pub notification_updates: Arc<notification_updates::Repository>,

    /// Repository for inbound delivery responses.
    pub notification_responses: Arc<notification_responses::Repository>,
}

impl Storage {
    /// Creates a storage instance over `pool`, stamping rows with `clock`.
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        let pool = Arc::new(pool);
        let notifications = Arc::new(notifications::Repository::new(pool.clone(), clock.clone()));

        Self {
            message_streams: Arc::new(message_streams::Repository::new(
                pool.clone(),
                clock.clone(),
            )),
            messages: Arc::new(messages::Repository::new(pool.clone(), clock.clone())),
            enrollments: Arc::new(enrollments::Repository::new(pool.clone(), clock.clone())),
            notification_updates: Arc::new(notification_updates::Repository::new(
                pool.clone(),
                clock.clone(),
            )),
            notification_responses: Arc::new(notification_responses::Repository::new(
                pool.clone(),
                clock,
                notifications.clone(),
            )),
            notifications,
            pool,
        }
    }

    /// Returns the shared connection pool.
    pub fn pool(&self) -> Arc<SqlitePool> {
        self.pool.clone()
    }

    /// Begins a write transaction on the shared pool; see [`begin_write`].
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the transaction cannot start.
    pub async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>> {
        begin_write(&self.pool).await
    }

    /// Creates every table and index that does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns error if a schema statement fails.
    pub async fn migrate(&self) -> Result<()> {
        for statement in schema::STATEMENTS {
            sqlx::query(statement).execute(&*self.pool).await?;
        }
        info!(statements = schema::STATEMENTS.len(), "database schema ensured");
        Ok(())
    }

    /// Performs a health check on the database connection.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TestClock;

    async fn memory_storage() -> Storage {
        let config = PoolConfig { url: "sqlite::memory:".to_string(), ..PoolConfig::default() };
        let pool = connect(&config).await.unwrap();
        Storage::new(pool, Arc::new(TestClock::new()))
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let storage = memory_storage().await;
        storage.migrate().await.unwrap();
        storage.migrate().await.unwrap();
        storage.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn foreign_keys_are_enforced() {
        let storage = memory_storage().await;
        storage.migrate().await.unwrap();

        let enabled: (i64,) =
            sqlx::query_as("PRAGMA foreign_keys").fetch_one(&*storage.pool()).await.unwrap();
        assert_eq!(enabled.0, 1);
    }
}
