//! Hub synchronization for Cadence.
//!
//! Notification updates queue up in the database as notifications are
//! created and cancelled. This crate hands that queue to the delivery hub
//! and keeps the schedule moving:
//!
//! 1. **Schedule** - create notifications for messages that have become due
//! 2. **Upload** - post pending updates to the hub in ascending id order
//! 3. **Stamp** - record `uploaded_at` and the hub's status code on success
//!
//! A batch the hub refuses stays pending, so the next pass re-offers it
//! without skipping or reordering anything.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cadence_core::{RealClock, ScheduleConfig, Scheduler, Storage};
//! use cadence_hub::{ClientConfig, EngineConfig, HubError, SyncEngine};
//!
//! # async fn example(storage: Arc<Storage>) -> Result<(), HubError> {
//! let clock = Arc::new(RealClock::new());
//! let scheduler = Scheduler::new(storage.clone(), clock.clone(), ScheduleConfig::default());
//! let mut engine = SyncEngine::over_http(
//!     storage,
//!     scheduler,
//!     clock,
//!     ClientConfig::default(),
//!     EngineConfig::default(),
//! )?;
//!
//! engine.start();
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod engine;
pub mod error;
pub mod storage;

pub use client::{ClientConfig, HttpHubClient, HubClient, UploadReceipt};
pub use engine::{EngineConfig, EngineStats, SyncEngine, UploadSummary};
pub use error::{HubError, Result};
pub use storage::{HubStorage, SqlHubStorage};

/// Default number of updates per upload request.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
