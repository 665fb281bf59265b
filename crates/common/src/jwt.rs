//! JWT utilities shared by the AAD gate crates.
//!
//! This module provides the provider-agnostic parts of bearer token validation:
//! - Size limits for DoS prevention
//! - Clock skew constants for time-bound validation
//! - Structural decode of the compact serialization (header, payload, signature)
//! - `exp` / `nbf` / `iat` validation logic
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Nothing returned from [`parse_compact`] is trusted; it only tells the caller
//!   which algorithm and key the token claims to use
//! - Generic error messages prevent information leakage
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{parse_compact, validate_time_bounds, TimeClaims, DEFAULT_CLOCK_SKEW};
//!
//! // Structural decode (includes the size check)
//! let header = parse_compact(token)?;
//!
//! // ...select key by header.kid and verify the signature...
//!
//! // After signature verification, validate exp/nbf/iat
//! let times = TimeClaims::from_claims(&claims)?;
//! validate_time_bounds(&times, DEFAULT_CLOCK_SKEW)?;
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// JWTs larger than this size are rejected BEFORE any parsing or cryptographic
/// operations.
///
/// # Rationale
///
/// - Azure AD access tokens are typically 1-3KB (RS256 signature, directory claims)
/// - Group overage replaces large `groups` claims with a link, so tokens stay bounded
/// - Checked BEFORE base64 decode and signature verification
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Default JWT clock skew tolerance.
///
/// Zero: a token whose `exp` lies one second in the past is expired. Deployments
/// with known drift raise this through configuration.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(0);

/// Maximum allowed JWT clock skew tolerance (10 minutes).
///
/// Upper bound for configuration so a typo cannot silently accept tokens that
/// expired hours ago.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during JWT structural and time-bound validation.
///
/// Note: Error messages are intentionally generic to prevent information leakage.
/// Detailed information is logged at debug level for troubleshooting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token format is invalid (not a valid JWT structure).
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Token `exp` claim is in the past.
    #[error("The access token is invalid or expired")]
    Expired,

    /// Token `nbf` claim is in the future.
    #[error("The access token is invalid or expired")]
    NotYetValid,

    /// Token `iat` claim is too far in the future.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,

    /// A required NumericDate claim is missing or not a number.
    #[error("The access token is invalid or expired")]
    InvalidTimeClaim(&'static str),
}

// =============================================================================
// Header and Time Claims
// =============================================================================

/// The JOSE header fields the validator cares about.
///
/// Deserialized from an unverified token, so every field is attacker-controlled
/// until the signature has been checked.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenHeader {
    /// Declared signing algorithm, as written in the token.
    pub alg: String,

    /// Key ID used to select the verification key. Empty strings are
    /// normalized to `None`.
    #[serde(default)]
    pub kid: Option<String>,

    /// Declared media type (usually "JWT").
    #[serde(default)]
    pub typ: Option<String>,
}

/// Registered time claims extracted from a verified claim set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeClaims {
    /// Expiration time (Unix epoch seconds).
    pub exp: i64,

    /// Not-before time (Unix epoch seconds).
    pub nbf: i64,

    /// Issued-at time (Unix epoch seconds).
    pub iat: i64,
}

impl TimeClaims {
    /// Read `exp`, `nbf` and `iat` from a claim map.
    ///
    /// All three are required. Fractional NumericDates are truncated toward
    /// negative infinity.
    ///
    /// # Errors
    ///
    /// Returns `JwtValidationError::InvalidTimeClaim` naming the first claim
    /// that is missing or not a number.
    pub fn from_claims(claims: &Map<String, Value>) -> Result<Self, JwtValidationError> {
        Ok(Self {
            exp: numeric_date(claims, "exp")?,
            nbf: numeric_date(claims, "nbf")?,
            iat: numeric_date(claims, "iat")?,
        })
    }
}

fn numeric_date(claims: &Map<String, Value>, name: &'static str) -> Result<i64, JwtValidationError> {
    let value = claims.get(name).ok_or_else(|| {
        tracing::debug!(target: "common.jwt", claim = name, "Token rejected: time claim missing");
        JwtValidationError::InvalidTimeClaim(name)
    })?;

    if let Some(seconds) = value.as_i64() {
        return Ok(seconds);
    }

    match value.as_f64() {
        // Safe cast: finite f64 NumericDates are far inside i64 range for any real token
        #[allow(clippy::cast_possible_truncation)]
        Some(seconds) if seconds.is_finite() => Ok(seconds.floor() as i64),
        _ => {
            tracing::debug!(target: "common.jwt", claim = name, "Token rejected: time claim is not a number");
            Err(JwtValidationError::InvalidTimeClaim(name))
        }
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Structurally decode a compact-serialized JWT without verifying it.
///
/// # Security
///
/// - Token size is checked BEFORE any parsing (denial-of-service prevention)
/// - All three segments must be base64url; header and payload must be JSON objects
/// - The signature segment may be empty so that `alg: none` tokens reach the
///   algorithm check and are rejected there with a precise reason
/// - This function does NOT validate the token signature
///
/// # Errors
///
/// Returns `JwtValidationError` variants:
/// - `TokenTooLarge` - Token exceeds size limit (denial-of-service protection)
/// - `MalformedToken` - Wrong segment count, bad base64, non-object JSON, or
///   a header without a string `alg`
pub fn parse_compact(token: &str) -> Result<TokenHeader, JwtValidationError> {
    // Check token size first (DoS prevention)
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    // JWT format: header.payload.signature
    let mut parts = token.split('.');
    let (Some(header_part), Some(payload_part), Some(signature_part), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        tracing::debug!(
            target: "common.jwt",
            parts = token.split('.').count(),
            "Token rejected: invalid JWT format"
        );
        return Err(JwtValidationError::MalformedToken);
    };

    let header_bytes = decode_segment(header_part, "header")?;
    let mut header: TokenHeader = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT header JSON");
        JwtValidationError::MalformedToken
    })?;

    let payload_bytes = decode_segment(payload_part, "payload")?;
    serde_json::from_slice::<Map<String, Value>>(&payload_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT payload JSON");
        JwtValidationError::MalformedToken
    })?;

    URL_SAFE_NO_PAD.decode(signature_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT signature base64");
        JwtValidationError::MalformedToken
    })?;

    // Reject empty kid values for defense-in-depth
    header.kid = header.kid.filter(|kid| !kid.is_empty());

    Ok(header)
}

fn decode_segment(segment: &str, name: &'static str) -> Result<Vec<u8>, JwtValidationError> {
    if segment.is_empty() {
        tracing::debug!(target: "common.jwt", segment = name, "Token rejected: empty segment");
        return Err(JwtValidationError::MalformedToken);
    }

    URL_SAFE_NO_PAD.decode(segment).map_err(|e| {
        tracing::debug!(target: "common.jwt", segment = name, error = %e, "Failed to decode JWT segment base64");
        JwtValidationError::MalformedToken
    })
}

/// Validate `exp`, `nbf` and `iat` against the current time with clock skew tolerance.
///
/// # Errors
///
/// - `Expired` - `exp` is more than `clock_skew` in the past
/// - `NotYetValid` - `nbf` is more than `clock_skew` in the future
/// - `IatTooFarInFuture` - `iat` is more than `clock_skew` in the future
pub fn validate_time_bounds(
    times: &TimeClaims,
    clock_skew: Duration,
) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_time_bounds_at(times, clock_skew, now)
}

/// Deterministic time-bound validation against an explicit `now` timestamp.
///
/// Prefer [`validate_time_bounds`] in production code. This variant exists so
/// that boundary conditions can be tested without wall-clock dependence.
///
/// # Errors
///
/// Same as [`validate_time_bounds`].
pub fn validate_time_bounds_at(
    times: &TimeClaims,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    // Safe cast: clock_skew is bounded to MAX_CLOCK_SKEW (600 seconds) by configuration
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;

    if times.exp < now.saturating_sub(clock_skew_secs) {
        tracing::debug!(
            target: "common.jwt",
            exp = times.exp,
            now = now,
            clock_skew_secs = clock_skew_secs,
            "Token rejected: expired"
        );
        return Err(JwtValidationError::Expired);
    }

    let latest_allowed = now.saturating_add(clock_skew_secs);

    if times.nbf > latest_allowed {
        tracing::debug!(
            target: "common.jwt",
            nbf = times.nbf,
            now = now,
            clock_skew_secs = clock_skew_secs,
            "Token rejected: not yet valid"
        );
        return Err(JwtValidationError::NotYetValid);
    }

    if times.iat > latest_allowed {
        tracing::debug!(
            target: "common.jwt",
            iat = times.iat,
            now = now,
            max_allowed = latest_allowed,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
