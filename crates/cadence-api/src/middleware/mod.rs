//! HTTP middleware for authentication and request tracing.

pub mod auth;
pub mod request_id;
