//! Metrics definitions for the authentication gate.
//!
//! All metrics follow Prometheus naming conventions:
//! - `aad_auth_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! The library records through the `metrics` facade only; installing an
//! exporter is the embedding service's job. With no recorder installed every
//! call is a no-op.
//!
//! # Cardinality
//!
//! Labels are bounded by code:
//! - `outcome`: `success` plus one value per `AuthError` kind (13 values)
//! - `cache`: 2 values (`metadata`, `jwks`)
//! - `status`: 2 values (`success`, `error`)

use metrics::{counter, histogram};
use std::time::Duration;

/// Which shared cache a refresh metric refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Metadata,
    Jwks,
}

impl CacheKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Metadata => "metadata",
            CacheKind::Jwks => "jwks",
        }
    }
}

// ============================================================================
// Request Metrics
// ============================================================================

/// Record one `authenticate` call.
///
/// Metric: `aad_auth_requests_total`
/// Labels: `outcome`
pub fn record_authentication(outcome: &'static str) {
    counter!("aad_auth_requests_total", "outcome" => outcome).increment(1);
}

// ============================================================================
// Cache Metrics
// ============================================================================

/// Record a discovery or JWKS fetch.
///
/// Metric: `aad_auth_cache_refresh_total`, `aad_auth_cache_refresh_duration_seconds`
/// Labels: `cache`, `status`
pub fn record_cache_refresh(cache: CacheKind, success: bool, duration: Duration) {
    histogram!("aad_auth_cache_refresh_duration_seconds",
        "cache" => cache.as_str()
    )
    .record(duration.as_secs_f64());

    counter!("aad_auth_cache_refresh_total",
        "cache" => cache.as_str(),
        "status" => if success { "success" } else { "error" }
    )
    .increment(1);
}

/// Record a request served from a stale snapshot after a failed refresh.
///
/// Metric: `aad_auth_stale_fallback_total`
/// Labels: `cache`
pub fn record_stale_fallback(cache: CacheKind) {
    counter!("aad_auth_stale_fallback_total", "cache" => cache.as_str()).increment(1);
}
