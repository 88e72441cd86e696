//! Request authentication: bearer tokens for the cron and control-panel
//! routes, `X-Hub-Signature-256` for Messenger webhook posts.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::error::ApiError;
use super::AppState;
use crate::config::AppConfig;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Byte-wise comparison that doesn't stop at the first mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn bearer_matches(headers: &HeaderMap, expected: &str) -> bool {
    bearer(headers)
        .map(|token| constant_time_eq(token.as_bytes(), expected.as_bytes()))
        .unwrap_or(false)
}

/// Cron calls pass when no secret is configured, when the hosting platform
/// marks the call as its own, or with `Bearer <CRON_SECRET>`.
///
/// The platform header is only trustworthy when the service sits behind that
/// platform's edge, which strips it from external requests. Set
/// `PLATFORM_CRON_HEADER` to a name no client can reach the service with when
/// deployed anywhere else.
pub fn cron_authorized(config: &AppConfig, headers: &HeaderMap) -> bool {
    let Some(secret) = config.cron_secret.as_deref() else {
        return true;
    };
    if headers.contains_key(config.platform_cron_header.as_str()) {
        return true;
    }
    bearer_matches(headers, secret)
}

/// Check a `sha256=<hex>` signature of `body` under `secret`.
pub fn verify_signature(secret: &str, body: &[u8], header: Option<&str>) -> bool {
    let Some(hex_sig) = header.and_then(|h| h.trim().strip_prefix("sha256=")) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Guard for the control-panel routes. Open when `ADMIN_TOKEN` is unset.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(token) = state.config.admin_token.as_deref() {
        if !bearer_matches(request.headers(), token) {
            tracing::warn!("Rejected control-panel request to {}", request.uri().path());
            return Err(ApiError::Unauthorized);
        }
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
pub(crate) fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
