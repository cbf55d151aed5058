//! Cadence HTTP API.
//!
//! Serves the credential-guarded admin views of the update queue, the
//! endpoint the hub posts delivery responses to, and unauthenticated health
//! probes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use cadence_core::{Clock, Storage};

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod server;

pub use config::Config;
pub use error::ApiError;
pub use middleware::auth::AdminCredentials;
pub use server::{create_router, shutdown_signal, start_server};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Repository access.
    pub storage: Arc<Storage>,
    /// Time source for timestamps in responses.
    pub clock: Arc<dyn Clock>,
    /// Credentials accepted on guarded routes.
    pub credentials: Arc<AdminCredentials>,
}
