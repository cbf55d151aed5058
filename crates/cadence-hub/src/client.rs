//! HTTP client for handing queued updates to the hub.
//!
//! A batch is posted as one JSON document. The hub either accepts the whole
//! batch (any 2xx) or none of it.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use cadence_core::{Clock, NotificationUpdate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn, Instrument};

use crate::error::{HubError, Result};

/// Configuration for the hub client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Hub base URL; batches go to `<base_url>/notification_updates`.
    pub base_url: String,
    /// Timeout for a single upload request.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3001".to_string(),
            timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            user_agent: concat!("Cadence-Hub-Sync/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Hub acknowledgement of an accepted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReceipt {
    /// HTTP status returned by the hub.
    pub status_code: u16,
    /// Round-trip time of the request.
    pub duration: Duration,
}

/// Upload operation the sync engine depends on.
pub trait HubClient: Send + Sync + 'static {
    /// Hands `updates` to the hub in the given order.
    ///
    /// `Ok` means the hub accepted the whole batch; any error means it
    /// accepted none of it.
    fn upload<'a>(
        &'a self,
        updates: &'a [NotificationUpdate],
    ) -> Pin<Box<dyn Future<Output = Result<UploadReceipt>> + Send + 'a>>;
}

#[derive(Serialize)]
struct UploadBody<'a> {
    updates: &'a [NotificationUpdate],
}

/// [`HubClient`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpHubClient {
    client: reqwest::Client,
    config: ClientConfig,
    endpoint: String,
    clock: Arc<dyn Clock>,
}

impl HttpHubClient {
    /// Creates a client with the given configuration. Round-trip times in
    /// [`UploadReceipt`] are measured on `clock`.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Configuration` if the base URL is empty or the HTTP
    /// client cannot be built.
    pub fn new(config: ClientConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let base = config.base_url.trim_end_matches('/');
        if base.is_empty() {
            return Err(HubError::configuration("hub base_url must not be empty"));
        }
        let endpoint = format!("{base}/notification_updates");

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| HubError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config, endpoint, clock })
    }

    /// URL batches are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post_batch(&self, updates: &[NotificationUpdate]) -> Result<UploadReceipt> {
        let started = self.clock.now();

        let response = self
            .client
            .post(&self.endpoint)
            .json(&UploadBody { updates })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HubError::timeout(self.config.timeout.as_secs())
                } else {
                    HubError::network(e.to_string())
                }
            })?;

        let duration = self.clock.now().saturating_duration_since(started);
        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), duration_ms = duration.as_millis(), "batch accepted");
            return Ok(UploadReceipt { status_code: status.as_u16(), duration });
        }

        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), duration_ms = duration.as_millis(), "batch refused");
        Err(HubError::from_status(status.as_u16(), body))
    }
}

impl HubClient for HttpHubClient {
    fn upload<'a>(
        &'a self,
        updates: &'a [NotificationUpdate],
    ) -> Pin<Box<dyn Future<Output = Result<UploadReceipt>> + Send + 'a>> {
        let span = info_span!(
            "hub_upload",
            batch_size = updates.len(),
            first_id = updates.first().map(|u| u.id.0),
        );
        Box::pin(self.post_batch(updates).instrument(span))
    }
}
