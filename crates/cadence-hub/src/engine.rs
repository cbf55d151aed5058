//! Background sync engine.
//!
//! Two cooperative loops share one cancellation token: the schedule loop
//! turns ready messages into notifications for every active enrollment, and
//! the upload loop hands the pending update queue to the hub. Each loop body
//! is also exposed as a single-pass method for one-shot runs and tests.

use std::{sync::Arc, time::Duration};

use cadence_core::{Clock, EnqueueSummary, Scheduler, Storage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    client::{ClientConfig, HttpHubClient, HubClient},
    error::{HubError, Result},
    storage::{HubStorage, SqlHubStorage},
};

/// Configuration for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum updates handed to the hub per request.
    pub batch_size: usize,
    /// Pause between schedule passes.
    pub schedule_interval: Duration,
    /// Pause between upload passes.
    pub upload_interval: Duration,
    /// Pause after a failed pass.
    pub error_backoff: Duration,
    /// Maximum time to wait for the loops to stop.
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: crate::DEFAULT_BATCH_SIZE,
            schedule_interval: Duration::from_secs(15 * 60),
            upload_interval: Duration::from_secs(60),
            error_backoff: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Checks that batches and intervals are non-zero.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Configuration` naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(HubError::configuration("batch_size must be at least 1"));
        }
        if self.schedule_interval.is_zero() {
            return Err(HubError::configuration("schedule_interval must be non-zero"));
        }
        if self.upload_interval.is_zero() {
            return Err(HubError::configuration("upload_interval must be non-zero"));
        }
        Ok(())
    }
}

/// Counters for engine monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Completed schedule passes.
    pub schedule_cycles: u64,
    /// Notifications created by schedule passes.
    pub notifications_enqueued: u64,
    /// Enrollments whose enqueue failed.
    pub enqueue_failures: u64,
    /// Completed upload passes, including ones that stopped on a refusal.
    pub upload_cycles: u64,
    /// Updates accepted by the hub.
    pub updates_uploaded: u64,
    /// Batches the hub accepted.
    pub batches_accepted: u64,
    /// Batches the hub refused or never received.
    pub batches_failed: u64,
    /// When the hub last accepted a batch.
    pub last_upload_at: Option<DateTime<Utc>>,
}

/// Outcome of one upload pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    /// Batches the hub accepted.
    pub batches: u64,
    /// Updates stamped as uploaded.
    pub uploaded: u64,
}

/// Coordinates the schedule and upload loops.
pub struct SyncEngine {
    worker: SyncWorker,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl SyncEngine {
    /// Creates an engine over explicit storage and client seams.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Configuration` if `config` is invalid.
    pub fn new(
        scheduler: Scheduler,
        storage: Arc<dyn HubStorage>,
        client: Arc<dyn HubClient>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let worker = SyncWorker {
            scheduler,
            storage,
            client,
            clock,
            config,
            stats: Arc::new(RwLock::new(EngineStats::default())),
            token: CancellationToken::new(),
        };
        Ok(Self { worker, handles: Vec::new() })
    }

    /// Creates an engine that uploads over HTTP from the SQLite queue.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Configuration` if either configuration is invalid.
    pub fn over_http(
        storage: Arc<Storage>,
        scheduler: Scheduler,
        clock: Arc<dyn Clock>,
        client_config: ClientConfig,
        config: EngineConfig,
    ) -> Result<Self> {
        let client = Arc::new(HttpHubClient::new(client_config, clock.clone())?);
        Self::new(scheduler, Arc::new(SqlHubStorage::new(storage)), client, clock, config)
    }

    /// Spawns both loops and returns immediately.
    ///
    /// Calling `start` on a running engine does nothing.
    pub fn start(&mut self) {
        if !self.handles.is_empty() {
            warn!("sync engine already started");
            return;
        }

        let schedule = self.worker.clone();
        let upload = self.worker.clone();
        self.handles.push(("schedule", tokio::spawn(async move { schedule.run_schedule_loop().await })));
        self.handles.push(("upload", tokio::spawn(async move { upload.run_upload_loop().await })));

        info!(
            batch_size = self.worker.config.batch_size,
            schedule_interval_secs = self.worker.config.schedule_interval.as_secs(),
            upload_interval_secs = self.worker.config.upload_interval.as_secs(),
            "sync engine started"
        );
    }

    /// Runs one schedule pass over every active enrollment.
    ///
    /// # Errors
    ///
    /// Returns error if the active enrollments cannot be listed.
    pub async fn run_schedule_cycle(&self) -> Result<EnqueueSummary> {
        self.worker.schedule_cycle().await
    }

    /// Hands the pending queue to the hub, batch by batch, in id order.
    ///
    /// Stops at the first batch the hub does not accept; that batch and
    /// everything after it stay pending.
    ///
    /// # Errors
    ///
    /// Returns the client error for the refused batch, or a storage error.
    pub async fn run_upload_cycle(&self) -> Result<UploadSummary> {
        self.worker.upload_cycle().await
    }

    /// Snapshot of the engine counters.
    pub async fn stats(&self) -> EngineStats {
        self.worker.stats.read().await.clone()
    }

    /// Returns true once shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.worker.token.is_cancelled()
    }

    /// Cancels both loops and waits for them to finish.
    ///
    /// A pass that is in flight completes before its loop exits.
    ///
    /// # Errors
    ///
    /// Returns `HubError::ShutdownTimeout` if the loops outlive the configured
    /// timeout, or `HubError::TaskPanic` if one of them panicked.
    pub async fn shutdown(mut self) -> Result<()> {
        self.worker.token.cancel();
        if self.handles.is_empty() {
            info!("sync engine was not started, shutdown completed immediately");
            return Ok(());
        }

        let timeout = self.worker.config.shutdown_timeout;
        let handles = std::mem::take(&mut self.handles);
        let joined = tokio::time::timeout(timeout, async move {
            for (task, handle) in handles {
                handle
                    .await
                    .map_err(|e| HubError::TaskPanic { task, error: e.to_string() })?;
            }
            Ok::<(), HubError>(())
        })
        .await;

        match joined {
            Ok(result) => {
                result?;
                info!("sync engine stopped");
                Ok(())
            },
            Err(_) => {
                error!(timeout_secs = timeout.as_secs(), "sync engine shutdown timed out");
                Err(HubError::ShutdownTimeout { timeout })
            },
        }
    }
}

/// State shared by both loops.
#[derive(Clone)]
struct SyncWorker {
    scheduler: Scheduler,
    storage: Arc<dyn HubStorage>,
    client: Arc<dyn HubClient>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    stats: Arc<RwLock<EngineStats>>,
    token: CancellationToken,
}

impl SyncWorker {
    async fn run_schedule_loop(&self) {
        info!("schedule loop starting");
        loop {
            if self.token.is_cancelled() {
                break;
            }

            let pause = match self.schedule_cycle().await {
                Ok(_) => self.config.schedule_interval,
                Err(e) => {
                    error!(error = %e, "schedule pass failed");
                    self.config.error_backoff
                },
            };

            // Intervals run on the tokio timer; the clock only stamps records.
            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                () = self.token.cancelled() => break,
            }
        }
        info!("schedule loop stopped");
    }

    async fn run_upload_loop(&self) {
        info!("upload loop starting");
        loop {
            if self.token.is_cancelled() {
                break;
            }

            let pause = match self.upload_cycle().await {
                Ok(_) => self.config.upload_interval,
                Err(e) if e.is_retryable() => {
                    warn!(error = %e, "upload pass interrupted, will retry");
                    self.config.error_backoff
                },
                Err(e) => {
                    error!(error = %e, "hub refused batch");
                    self.config.upload_interval
                },
            };

            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                () = self.token.cancelled() => break,
            }
        }
        info!("upload loop stopped");
    }

    #[instrument(skip(self))]
    async fn schedule_cycle(&self) -> Result<EnqueueSummary> {
        let summary = self.scheduler.enqueue_all_active().await?;

        let mut stats = self.stats.write().await;
        stats.schedule_cycles += 1;
        stats.notifications_enqueued += summary.created as u64;
        stats.enqueue_failures += summary.failed as u64;
        Ok(summary)
    }

    #[instrument(skip(self))]
    async fn upload_cycle(&self) -> Result<UploadSummary> {
        let mut summary = UploadSummary::default();
        let result = self.upload_batches(&mut summary).await;

        let mut stats = self.stats.write().await;
        stats.upload_cycles += 1;
        stats.updates_uploaded += summary.uploaded;
        stats.batches_accepted += summary.batches;
        if result.is_err() {
            stats.batches_failed += 1;
        } else if summary.batches > 0 {
            stats.last_upload_at = Some(self.clock.now_utc());
        }
        drop(stats);

        result.map(|()| summary)
    }

    async fn upload_batches(&self, summary: &mut UploadSummary) -> Result<()> {
        loop {
            if self.token.is_cancelled() {
                return Ok(());
            }

            let batch = self.storage.pending_updates(self.config.batch_size).await?;
            if batch.is_empty() {
                return Ok(());
            }

            let receipt = self.client.upload(&batch).await?;
            let ids: Vec<_> = batch.iter().map(|update| update.id).collect();
            let changed =
                self.storage.mark_uploaded(ids, self.clock.now_utc(), receipt.status_code).await?;

            summary.batches += 1;
            summary.uploaded += changed;
            debug!(
                batch_size = batch.len(),
                changed,
                status = receipt.status_code,
                "batch uploaded"
            );

            // A short batch drained the queue; nothing changed means another
            // writer stamped it first and re-reading would loop forever.
            if batch.len() < self.config.batch_size || changed == 0 {
                return Ok(());
            }
        }
    }
}
