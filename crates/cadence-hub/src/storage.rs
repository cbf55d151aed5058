//! Storage operations the sync engine needs from the update queue.
//!
//! The trait keeps the engine independent of SQL so upload behavior can be
//! exercised against an in-memory double as well as a real database.

use std::{future::Future, pin::Pin, sync::Arc};

use cadence_core::{NotificationUpdate, NotificationUpdateId, Result, Storage};
use chrono::{DateTime, Utc};

/// Queue access required by the sync engine.
pub trait HubStorage: Send + Sync + 'static {
    /// Oldest pending updates in ascending id order, at most `limit`.
    fn pending_updates(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<NotificationUpdate>>> + Send + '_>>;

    /// Stamps `ids` as accepted by the hub with the given status code.
    ///
    /// Returns how many updates changed; already-uploaded ids are skipped.
    fn mark_uploaded(
        &self,
        ids: Vec<NotificationUpdateId>,
        uploaded_at: DateTime<Utc>,
        response_code: u16,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>>;

    /// Number of updates still waiting for upload.
    fn count_pending(&self) -> Pin<Box<dyn Future<Output = Result<i64>> + Send + '_>>;
}

/// [`HubStorage`] over the SQLite repositories.
#[derive(Clone)]
pub struct SqlHubStorage {
    storage: Arc<Storage>,
}

impl SqlHubStorage {
    /// Wraps the shared repository container.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl HubStorage for SqlHubStorage {
    fn pending_updates(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<NotificationUpdate>>> + Send + '_>> {
        let storage = self.storage.clone();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Box::pin(async move { storage.notification_updates.pending(Some(limit)).await })
    }

    fn mark_uploaded(
        &self,
        ids: Vec<NotificationUpdateId>,
        uploaded_at: DateTime<Utc>,
        response_code: u16,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage
                .notification_updates
                .mark_uploaded(&ids, uploaded_at, i32::from(response_code))
                .await
        })
    }

    fn count_pending(&self) -> Pin<Box<dyn Future<Output = Result<i64>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.notification_updates.count_pending().await })
    }
}
