//! Token validation.
//!
//! Validates bearer tokens against the provider's signing keys and the
//! configured tenants, audiences and permissions.
//!
//! # Security
//!
//! Steps run in a fixed order and each one short-circuits:
//!
//! 1. Size and structure check before any decoding (DoS prevention)
//! 2. Header `alg` must equal the configured RSA algorithm; `none` and HMAC
//!    are rejected before a key is looked up (algorithm confusion)
//! 3. Key selection by `kid`
//! 4. Signature verification; no claim is trusted before this step
//! 5. `exp`, `nbf` and `iat` with clock skew tolerance
//! 6. Tenant, issuer, audience and scope/role checks
//!
//! Unexpected decode or crypto failures become `UnableToProcessToken`.

use crate::auth::claims::ValidatedClaims;
use crate::auth::jwks::{SigningKey, SigningKeySource};
use crate::auth::metadata::ProviderMetadata;
use crate::config::AuthConfig;
use crate::errors::AuthError;
use common::jwt::{parse_compact, validate_time_bounds_at, JwtValidationError, TimeClaims};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, Validation};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tracing::instrument;

/// Validates tokens for one gate configuration.
pub struct TokenValidator {
    keys: Arc<dyn SigningKeySource>,
    config: Arc<AuthConfig>,
    accepted_audiences: Vec<String>,
}

impl TokenValidator {
    pub fn new(keys: Arc<dyn SigningKeySource>, config: Arc<AuthConfig>) -> Self {
        let accepted_audiences = config.accepted_audiences();
        Self {
            keys,
            config,
            accepted_audiences,
        }
    }

    /// Validate a token and return its claims.
    ///
    /// # Errors
    ///
    /// Returns the `AuthError` kind of the first failed step.
    pub async fn validate(
        &self,
        token: &str,
        metadata: &ProviderMetadata,
    ) -> Result<ValidatedClaims, AuthError> {
        self.validate_at(token, metadata, chrono::Utc::now().timestamp())
            .await
    }

    /// Deterministic validation against an explicit `now` timestamp.
    ///
    /// # Errors
    ///
    /// Same as [`TokenValidator::validate`].
    #[instrument(skip_all)]
    pub async fn validate_at(
        &self,
        token: &str,
        metadata: &ProviderMetadata,
        now: i64,
    ) -> Result<ValidatedClaims, AuthError> {
        // 1. Structure (includes size check via common::jwt)
        let header = parse_compact(token).map_err(|e| {
            tracing::debug!(target: "aad.jwt", error = ?e, "Token structure check failed");
            AuthError::MalformedToken
        })?;

        // 2. Algorithm and kid
        let algorithm = self.check_algorithm(&header.alg)?;
        let kid = header.kid.filter(|kid| !kid.is_empty()).ok_or_else(|| {
            tracing::debug!(target: "aad.jwt", "Token header has no kid");
            AuthError::UnableToValidate
        })?;

        // 3. Key selection
        let key = self.keys.get_key(&kid).await.map_err(|e| {
            tracing::debug!(target: "aad.jwt", kid = %kid, error = %e, "No verification key");
            AuthError::from(e)
        })?;

        // 4. Signature
        let raw = verify_signature(token, &key, algorithm)?;

        // 5. Time bounds
        let times = TimeClaims::from_claims(&raw).map_err(|e| {
            tracing::debug!(target: "aad.jwt", error = ?e, "Time claims invalid");
            AuthError::InvalidClaims
        })?;
        validate_time_bounds_at(&times, self.config.clock_skew, now).map_err(|e| match e {
            JwtValidationError::Expired => AuthError::TokenExpired,
            JwtValidationError::NotYetValid | JwtValidationError::IatTooFarInFuture => {
                AuthError::TokenNotYetValid
            }
            _ => AuthError::InvalidClaims,
        })?;

        // 6. Claims
        let claims = ValidatedClaims::from_verified(raw, times).map_err(|claim| {
            tracing::debug!(target: "aad.jwt", claim = claim, "Required claim missing or malformed");
            AuthError::InvalidClaims
        })?;
        self.check_claims(&claims, metadata)?;

        tracing::debug!(target: "aad.jwt", "Token validated successfully");
        Ok(claims)
    }

    fn check_algorithm(&self, alg: &str) -> Result<Algorithm, AuthError> {
        match Algorithm::from_str(alg) {
            Ok(algorithm) if algorithm == self.config.signing_algorithm => Ok(algorithm),
            _ => {
                tracing::debug!(
                    target: "aad.jwt",
                    alg = %alg,
                    expected = ?self.config.signing_algorithm,
                    "Token algorithm rejected"
                );
                Err(AuthError::UnsupportedAlgorithm)
            }
        }
    }

    fn check_claims(
        &self,
        claims: &ValidatedClaims,
        metadata: &ProviderMetadata,
    ) -> Result<(), AuthError> {
        if !self.config.accepts_tenant(&claims.tid) {
            tracing::debug!(target: "aad.jwt", tid = %claims.tid, "Tenant not accepted");
            return Err(AuthError::InvalidClaims);
        }

        let expected_issuer = metadata.issuer_for_tenant(&claims.tid, self.config.home_tenant());
        if claims.iss != expected_issuer {
            tracing::debug!(
                target: "aad.jwt",
                iss = %claims.iss,
                expected = %expected_issuer,
                "Issuer mismatch"
            );
            return Err(AuthError::InvalidClaims);
        }

        if !claims
            .aud
            .iter()
            .any(|aud| self.accepted_audiences.contains(aud))
        {
            tracing::debug!(target: "aad.jwt", aud = ?claims.aud, "Audience mismatch");
            return Err(AuthError::InvalidClaims);
        }

        if !self.has_required_permissions(claims) {
            tracing::debug!(
                target: "aad.jwt",
                scp = ?claims.scp,
                roles = ?claims.roles,
                "Required scope or role missing"
            );
            return Err(AuthError::InvalidClaims);
        }

        Ok(())
    }

    /// Delegated tokens satisfy the scope requirement, application tokens
    /// the role requirement; either one is enough.
    fn has_required_permissions(&self, claims: &ValidatedClaims) -> bool {
        let scopes = &self.config.required_scopes;
        let roles = &self.config.required_roles;

        if scopes.is_empty() && roles.is_empty() {
            return true;
        }

        let scopes_ok = !scopes.is_empty() && scopes.iter().all(|s| claims.has_scope(s));
        let roles_ok = !roles.is_empty() && roles.iter().all(|r| claims.has_role(r));
        scopes_ok || roles_ok
    }
}

/// Verify the signature and return the claim map. Claim checks are left to
/// the caller.
fn verify_signature(
    token: &str,
    key: &SigningKey,
    algorithm: Algorithm,
) -> Result<Map<String, Value>, AuthError> {
    if let Some(declared) = key.algorithm {
        if declared != algorithm {
            tracing::warn!(
                target: "aad.jwt",
                kid = %key.kid,
                declared = ?declared,
                "Key algorithm does not match token algorithm"
            );
            return Err(AuthError::InvalidSignature);
        }
    }

    let decoding_key = key.decoding_key().map_err(|e| {
        tracing::error!(target: "aad.jwt", kid = %key.kid, error = %e, "Invalid key material");
        AuthError::UnableToProcessToken
    })?;

    let mut validation = Validation::new(algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    let token_data = decode::<Map<String, Value>>(token, &decoding_key, &validation).map_err(|e| {
        tracing::debug!(target: "aad.jwt", error = %e, "Token verification failed");
        match e.kind() {
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::InvalidAlgorithm => AuthError::UnsupportedAlgorithm,
            _ => AuthError::UnableToProcessToken,
        }
    })?;

    Ok(token_data.claims)
}
