//! HTTP request handlers.
//!
//! Handlers are grouped by caller:
//! - `health` - unauthenticated probes
//! - `notification_updates` - admin views of the outbound queue
//! - `hub_responses` - delivery results posted by the hub

pub mod health;
pub mod hub_responses;
pub mod notification_updates;

pub use health::{health_check, liveness_check, readiness_check};
pub use hub_responses::create_response;
pub use notification_updates::{list_updates, show_update};
