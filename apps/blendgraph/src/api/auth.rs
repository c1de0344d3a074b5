//! Who is calling, and are they allowed in.
//!
//! A configured `server.api_key` gates every route but `/health`; clients send
//! it as `Authorization: Bearer <key>` (a bare key is accepted too).
//!
//! Separately, access checks on formulas run for the user named in the
//! `X-User-Id` header. Without the header a request is [`ANONYMOUS`] and
//! sees published formulas only.

use super::types::ApiError;
use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{HeaderMap, Request, header, request::Parts},
    middleware::Next,
    response::Response,
};
use blendgraph_core::UserId;
use std::sync::Arc;
use subtle::{Choice, ConstantTimeEq};

/// Header naming the user a request acts for.
pub const USER_HEADER: &str = "x-user-id";

/// User assumed when no `X-User-Id` header is sent.
pub const ANONYMOUS: UserId = UserId(0);

const UNGUARDED_PATH: &str = "/health";

/// The server's API key.
#[derive(Clone)]
pub struct ApiKey(Arc<str>);

impl ApiKey {
    pub fn new(key: &str) -> Self {
        Self(Arc::from(key))
    }

    /// Byte-for-byte comparison whose timing does not depend on where the
    /// first mismatch is. The shorter side is read as zero past its end.
    fn accepts(&self, candidate: &str) -> bool {
        let ours = self.0.as_bytes();
        let theirs = candidate.as_bytes();
        let width = ours.len().max(theirs.len());

        let mut same = Choice::from(1u8);
        for i in 0..width {
            let a = ours.get(i).copied().unwrap_or(0);
            let b = theirs.get(i).copied().unwrap_or(0);
            same &= a.ct_eq(&b);
        }
        same &= (ours.len() as u64).ct_eq(&(theirs.len() as u64));
        same.into()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(..)")
    }
}

fn presented_key(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    Some(raw.strip_prefix("Bearer ").unwrap_or(raw))
}

/// Rejects requests that do not carry the configured key.
pub async fn require_api_key(
    State(key): State<ApiKey>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if request.uri().path() == UNGUARDED_PATH {
        return Ok(next.run(request).await);
    }

    match presented_key(request.headers()) {
        Some(candidate) if key.accepts(candidate) => Ok(next.run(request).await),
        Some(_) => {
            tracing::warn!(
                event = "auth_rejected",
                cause = "wrong_key",
                path = %request.uri().path()
            );
            Err(ApiError::Unauthorized)
        }
        None => {
            tracing::warn!(
                event = "auth_rejected",
                cause = "no_key",
                path = %request.uri().path()
            );
            Err(ApiError::Unauthorized)
        }
    }
}

/// The user a request acts for, from `X-User-Id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActingUser(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for ActingUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(USER_HEADER) else {
            return Ok(Self(ANONYMOUS));
        };
        value
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(|id| Self(UserId(id)))
            .ok_or_else(|| ApiError::BadRequest("X-User-Id must be a numeric user id".to_string()))
    }
}
