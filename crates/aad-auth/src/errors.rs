//! Authentication gate error types.
//!
//! [`AuthError`] is the closed set of rejection reasons the gate reports to
//! callers. Each variant carries a stable code and a fixed human-readable
//! message; neither ever includes token content. Internal failures
//! ([`MetadataError`], [`KeyStoreError`]) are logged with detail and then
//! collapsed into one of these kinds.

use serde::Serialize;
use thiserror::Error;

/// Rejection reason returned by the gate.
///
/// Maps to HTTP status codes for callers that front an HTTP API:
/// - GuestNotAllowed: 403 Forbidden
/// - DiscoveryFailed: 503 Service Unavailable
/// - everything else: 401 Unauthorized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum AuthError {
    #[error("Not authenticated")]
    MissingOrMalformedHeader,

    #[error("Invalid token format")]
    MalformedToken,

    #[error("Token signed with an unsupported algorithm")]
    UnsupportedAlgorithm,

    #[error("Unable to verify token, no signing keys found")]
    NoSigningKeysFound,

    #[error("Unable to validate token")]
    UnableToValidate,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token signature has expired")]
    TokenExpired,

    #[error("Token is not yet valid")]
    TokenNotYetValid,

    #[error("Token contains invalid claims")]
    InvalidClaims,

    #[error("Unable to process token")]
    UnableToProcessToken,

    #[error("Guest users not allowed")]
    GuestNotAllowed,

    #[error("Connection to the identity provider is down. Unable to fetch provider configuration")]
    DiscoveryFailed,
}

impl AuthError {
    /// Every variant, in declaration order.
    pub const ALL: [AuthError; 12] = [
        AuthError::MissingOrMalformedHeader,
        AuthError::MalformedToken,
        AuthError::UnsupportedAlgorithm,
        AuthError::NoSigningKeysFound,
        AuthError::UnableToValidate,
        AuthError::InvalidSignature,
        AuthError::TokenExpired,
        AuthError::TokenNotYetValid,
        AuthError::InvalidClaims,
        AuthError::UnableToProcessToken,
        AuthError::GuestNotAllowed,
        AuthError::DiscoveryFailed,
    ];

    /// Stable machine-readable code, e.g. `TOKEN_EXPIRED`.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingOrMalformedHeader => "MISSING_OR_MALFORMED_HEADER",
            AuthError::MalformedToken => "MALFORMED_TOKEN",
            AuthError::UnsupportedAlgorithm => "UNSUPPORTED_ALGORITHM",
            AuthError::NoSigningKeysFound => "NO_SIGNING_KEYS_FOUND",
            AuthError::UnableToValidate => "UNABLE_TO_VALIDATE",
            AuthError::InvalidSignature => "INVALID_SIGNATURE",
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::TokenNotYetValid => "TOKEN_NOT_YET_VALID",
            AuthError::InvalidClaims => "INVALID_CLAIMS",
            AuthError::UnableToProcessToken => "UNABLE_TO_PROCESS_TOKEN",
            AuthError::GuestNotAllowed => "GUEST_NOT_ALLOWED",
            AuthError::DiscoveryFailed => "DISCOVERY_FAILED",
        }
    }

    /// Lowercase code used as the `outcome` metric label.
    pub fn outcome_label(&self) -> &'static str {
        match self {
            AuthError::MissingOrMalformedHeader => "missing_or_malformed_header",
            AuthError::MalformedToken => "malformed_token",
            AuthError::UnsupportedAlgorithm => "unsupported_algorithm",
            AuthError::NoSigningKeysFound => "no_signing_keys_found",
            AuthError::UnableToValidate => "unable_to_validate",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::TokenExpired => "token_expired",
            AuthError::TokenNotYetValid => "token_not_yet_valid",
            AuthError::InvalidClaims => "invalid_claims",
            AuthError::UnableToProcessToken => "unable_to_process_token",
            AuthError::GuestNotAllowed => "guest_not_allowed",
            AuthError::DiscoveryFailed => "discovery_failed",
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::GuestNotAllowed => 403,
            AuthError::DiscoveryFailed => 503,
            _ => 401,
        }
    }

    /// Serializable body for callers that report the rejection as JSON.
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message: self.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// Failure to obtain provider metadata.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    #[error("Discovery request failed: {0}")]
    Request(String),

    #[error("Discovery endpoint returned HTTP {0}")]
    Status(u16),

    #[error("Discovery document is invalid: {0}")]
    InvalidDocument(String),
}

/// Failure to obtain a verification key.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    /// The key set could not be fetched and nothing is cached.
    #[error("Signing keys unavailable: {0}")]
    Unavailable(String),

    /// The key set was fetched but holds no usable signing keys.
    #[error("No signing keys published")]
    NoKeysFound,

    /// The key set holds keys, but none with the requested `kid`.
    #[error("No signing key matches the token")]
    KeyNotFound,
}

impl From<KeyStoreError> for AuthError {
    fn from(err: KeyStoreError) -> Self {
        match err {
            KeyStoreError::Unavailable(_) => AuthError::DiscoveryFailed,
            KeyStoreError::NoKeysFound => AuthError::NoSigningKeysFound,
            KeyStoreError::KeyNotFound => AuthError::UnableToValidate,
        }
    }
}

impl From<MetadataError> for AuthError {
    fn from(_: MetadataError) -> Self {
        AuthError::DiscoveryFailed
    }
}
