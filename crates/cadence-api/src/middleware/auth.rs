//! HTTP Basic authentication for admin and hub routes.
//!
//! Credentials are kept only as a SHA-256 digest of `username:password`, and
//! requests are checked by comparing digests of what they present.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::AppState;

const REALM: &str = "Basic realm=\"cadence\"";

/// The single credential pair accepted on guarded routes.
#[derive(Clone)]
pub struct AdminCredentials {
    username: String,
    digest: [u8; 32],
}

impl AdminCredentials {
    /// Stores a digest of `username` and `password`.
    pub fn new(username: impl Into<String>, password: &str) -> Self {
        let username = username.into();
        let digest = credential_digest(&username, password);
        Self { username, digest }
    }

    /// Configured username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns true if the pair matches the stored credentials.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let presented = credential_digest(username, password);
        // Fold over every byte so the comparison time does not depend on
        // where the digests first differ.
        presented.iter().zip(self.digest.iter()).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
    }
}

impl std::fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminCredentials").field("username", &self.username).finish_non_exhaustive()
    }
}

fn credential_digest(username: &str, password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(username.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

/// Extracts the username and password from a Basic Authorization header.
fn extract_basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let encoded = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Basic "))?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Errors that can occur during Basic authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// The Authorization header is missing or not Basic.
    MissingCredentials,
    /// The credentials do not match.
    InvalidCredentials,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match self {
            Self::MissingCredentials => "Missing credentials",
            Self::InvalidCredentials => "Invalid credentials",
        };

        let mut response = (StatusCode::UNAUTHORIZED, message).into_response();
        response.headers_mut().insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(REALM));
        response
    }
}

/// Axum middleware rejecting requests without valid Basic credentials.
pub async fn basic_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let (username, password) =
        extract_basic_credentials(req.headers()).ok_or(AuthError::MissingCredentials)?;

    if !state.credentials.verify(&username, &password) {
        debug!(username = %username, "rejected credentials");
        return Err(AuthError::InvalidCredentials);
    }

    Ok(next.run(req).await)
}
