//! API-key authentication.
//!
//! Keys are compared as SHA-256 digests in constant time. HTTP routes take
//! the key from an `Authorization: Bearer` or `X-API-Key` header; the
//! WebSocket endpoint verifies the same key in-band (see [`crate::ws`]).

use crate::{ApiError, AppState};
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bitcoin::hashes::{sha256, Hash};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Holds the configured API-key digest, if authentication is enabled.
#[derive(Clone)]
pub struct AuthState {
    key_digest: Option<[u8; 32]>,
}

impl AuthState {
    /// Creates auth state; `None` disables authentication.
    pub fn new(api_key: Option<&str>) -> Self {
        Self {
            key_digest: api_key.map(digest),
        }
    }

    /// Whether authentication is disabled.
    pub fn disabled(&self) -> bool {
        self.key_digest.is_none()
    }

    /// Verifies a presented key against the configured digest in constant
    /// time. Always true when authentication is disabled.
    pub fn verify(&self, presented: &str) -> bool {
        match &self.key_digest {
            None => true,
            Some(expected) => digest(presented)[..].ct_eq(&expected[..]).into(),
        }
    }
}

fn digest(key: &str) -> [u8; 32] {
    sha256::Hash::hash(key.as_bytes()).to_byte_array()
}

/// Middleware rejecting requests without a valid API key.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    if state.auth.disabled() {
        return next.run(req).await;
    }

    let presented = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| {
            req.headers()
                .get("x-api-key")
                .and_then(|v| v.to_str().ok())
        });

    match presented {
        Some(key) if state.auth.verify(key) => next.run(req).await,
        _ => {
            tracing::warn!(path = %req.uri().path(), "rejected unauthenticated request");
            ApiError::Unauthorized.into_response()
        }
    }
}
