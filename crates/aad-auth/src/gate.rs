//! Authentication gate.
//!
//! The single entry point for callers: takes the raw `Authorization` header
//! value and returns a [`Principal`] or an [`AuthError`].
//!
//! The gate owns one metadata cache and one key store per configuration.
//! Construct it once at startup and share it (it is `Send + Sync`); build
//! separate gates for separate configurations, or inject shared caches via
//! [`AuthenticationGateBuilder`].

use crate::auth::guest::{GuestPolicy, Principal};
use crate::auth::jwks::{SigningKeySource, SigningKeyStore};
use crate::auth::jwt::TokenValidator;
use crate::auth::metadata::{build_http_client, ProviderMetadataCache};
use crate::config::{AuthConfig, ConfigError};
use crate::errors::AuthError;
use crate::observability::metrics::record_authentication;
use common::secret::SecretString;
use std::sync::Arc;
use tracing::instrument;

const BEARER_SCHEME: &str = "bearer";

pub struct AuthenticationGate {
    config: Arc<AuthConfig>,
    metadata: Arc<ProviderMetadataCache>,
    keys: Arc<dyn SigningKeySource>,
    validator: TokenValidator,
    guest_policy: GuestPolicy,
}

/// Builds an [`AuthenticationGate`] with optionally injected collaborators.
pub struct AuthenticationGateBuilder {
    config: AuthConfig,
    http_client: Option<reqwest::Client>,
    metadata: Option<Arc<ProviderMetadataCache>>,
    keys: Option<Arc<dyn SigningKeySource>>,
}

impl AuthenticationGateBuilder {
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Use an existing metadata cache, e.g. one shared with another gate for
    /// the same provider.
    pub fn with_metadata_cache(mut self, metadata: Arc<ProviderMetadataCache>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Use a custom key source instead of the JWKS-backed store.
    pub fn with_key_source(mut self, keys: Arc<dyn SigningKeySource>) -> Self {
        self.keys = Some(keys);
        self
    }

    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration is invalid or the HTTP
    /// client cannot be built.
    pub fn build(self) -> Result<AuthenticationGate, ConfigError> {
        self.config.validate()?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => build_http_client(self.config.fetch_timeout)
                .map_err(|e| ConfigError::HttpClient(e.to_string()))?,
        };

        let metadata = match self.metadata {
            Some(metadata) => metadata,
            None => Arc::new(ProviderMetadataCache::new(
                self.config.discovery_url()?,
                http_client.clone(),
                self.config.metadata_ttl,
            )),
        };

        let keys: Arc<dyn SigningKeySource> = match self.keys {
            Some(keys) => keys,
            None => Arc::new(SigningKeyStore::new(
                Arc::clone(&metadata),
                http_client,
                self.config.jwks_ttl,
            )),
        };

        let config = Arc::new(self.config);
        let validator = TokenValidator::new(Arc::clone(&keys), Arc::clone(&config));
        let guest_policy = GuestPolicy::from_config(&config);

        tracing::info!(
            target: "aad.gate",
            discovery_url = %metadata.discovery_url(),
            token_version = ?config.token_version,
            allow_guest_users = config.allow_guest_users,
            "Authentication gate configured"
        );

        Ok(AuthenticationGate {
            config,
            metadata,
            keys,
            validator,
            guest_policy,
        })
    }
}

impl AuthenticationGate {
    /// Build a gate with its own HTTP client, metadata cache and key store.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn new(config: AuthConfig) -> Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    pub fn builder(config: AuthConfig) -> AuthenticationGateBuilder {
        AuthenticationGateBuilder {
            config,
            http_client: None,
            metadata: None,
            keys: None,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn metadata_cache(&self) -> &Arc<ProviderMetadataCache> {
        &self.metadata
    }

    /// Authenticate a request from its `Authorization` header value.
    ///
    /// # Errors
    ///
    /// Returns the `AuthError` describing why the request is rejected.
    #[instrument(skip_all)]
    pub async fn authenticate(&self, authorization: &str) -> Result<Principal, AuthError> {
        let result = self.run(authorization).await;

        match &result {
            Ok(principal) => {
                record_authentication("success");
                tracing::debug!(
                    target: "aad.gate",
                    tid = %principal.claims.tid,
                    is_guest = principal.is_guest,
                    "Request authenticated"
                );
            }
            Err(e) => {
                record_authentication(e.outcome_label());
                tracing::info!(target: "aad.gate", code = e.code(), "Request rejected");
            }
        }

        result
    }

    async fn run(&self, authorization: &str) -> Result<Principal, AuthError> {
        let token = extract_bearer_token(authorization)?;

        let metadata = self.metadata.get_metadata().await.inspect_err(|e| {
            tracing::warn!(target: "aad.gate", error = %e, "Provider metadata unavailable");
        })?;

        let claims = self.validator.validate(token, &metadata).await?;

        self.guest_policy
            .classify(claims, SecretString::from(token.to_string()))
    }

    /// Load provider metadata and signing keys ahead of the first request.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::DiscoveryFailed` if either cannot be fetched.
    pub async fn warm_up(&self) -> Result<(), AuthError> {
        self.metadata.get_metadata().await.inspect_err(|e| {
            tracing::error!(target: "aad.gate", error = %e, "Warm-up: provider metadata unavailable");
        })?;

        self.keys.warm_up().await.map_err(|e| {
            tracing::error!(target: "aad.gate", error = %e, "Warm-up: signing keys unavailable");
            AuthError::DiscoveryFailed
        })?;

        tracing::info!(target: "aad.gate", "Authentication gate warmed up");
        Ok(())
    }
}

/// Strip the `Bearer` scheme from an `Authorization` header value.
///
/// The scheme is matched case-insensitively and surrounding whitespace is
/// ignored. The token itself must be non-empty and contain no whitespace.
fn extract_bearer_token(authorization: &str) -> Result<&str, AuthError> {
    let (scheme, token) = authorization
        .trim()
        .split_once(|c: char| c.is_ascii_whitespace())
        .ok_or_else(|| {
            tracing::debug!(target: "aad.gate", "Authorization header missing scheme or token");
            AuthError::MissingOrMalformedHeader
        })?;

    if !scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
        tracing::debug!(target: "aad.gate", "Authorization scheme is not Bearer");
        return Err(AuthError::MissingOrMalformedHeader);
    }

    let token = token.trim();
    if token.is_empty() || token.contains(char::is_whitespace) {
        tracing::debug!(target: "aad.gate", "Bearer token empty or malformed");
        return Err(AuthError::MissingOrMalformedHeader);
    }

    Ok(token)
}
