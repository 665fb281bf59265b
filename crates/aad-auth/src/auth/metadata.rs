//! Provider metadata cache.
//!
//! Fetches the identity provider's OpenID discovery document and keeps the
//! fields the gate needs (`issuer`, `jwks_uri` and the two endpoints) as an
//! immutable [`ProviderMetadata`] snapshot.
//!
//! # Failure policy
//!
//! - Fail open on staleness: if a refresh fails after a document was fetched
//!   once, the previous document keeps being served and the failure is
//!   logged. A provider outage does not take down a working deployment.
//! - Fail closed when cold: if no document was ever fetched, callers get an
//!   error and the gate rejects with `DiscoveryFailed`.
//!
//! Concurrent callers that find the cache cold or expired share one fetch.

use crate::auth::refresh::RefreshCell;
use crate::errors::MetadataError;
use crate::observability::metrics::CacheKind;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// The provider endpoints and issuer advertised by the discovery document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMetadata {
    /// Issuer. Multi-tenant documents carry a `{tenantid}` placeholder.
    pub issuer: String,

    /// Where the signing key set is published.
    pub jwks_uri: String,

    pub authorization_endpoint: String,

    pub token_endpoint: String,

    /// When this document was fetched.
    pub fetched_at: DateTime<Utc>,
}

impl ProviderMetadata {
    /// The issuer a token from tenant `tid` must carry.
    ///
    /// Multi-tenant documents carry a `{tenantid}` placeholder. Single-tenant
    /// documents name `home_tenant` literally; a token from another accepted
    /// tenant carries the same issuer with its own tenant id in that place.
    pub fn issuer_for_tenant(&self, tid: &str, home_tenant: Option<&str>) -> String {
        let issuer = self.issuer.replace("{tenantid}", tid);
        match home_tenant {
            Some(home) if !home.is_empty() && home != tid => issuer.replace(home, tid),
            _ => issuer,
        }
    }
}

/// Discovery document as published. Only the fields we read are modelled.
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    #[serde(default)]
    issuer: Option<String>,
    #[serde(default)]
    jwks_uri: Option<String>,
    #[serde(default)]
    authorization_endpoint: Option<String>,
    #[serde(default)]
    token_endpoint: Option<String>,
}

/// Caches [`ProviderMetadata`] for one discovery URL.
pub struct ProviderMetadataCache {
    discovery_url: Url,
    http_client: reqwest::Client,
    cell: RefreshCell<ProviderMetadata, MetadataError>,
}

impl ProviderMetadataCache {
    /// Create a cache for `discovery_url`.
    ///
    /// `http_client` should carry the configured fetch timeout; see
    /// [`build_http_client`].
    pub fn new(discovery_url: Url, http_client: reqwest::Client, ttl: Duration) -> Self {
        Self {
            discovery_url,
            http_client,
            cell: RefreshCell::new(CacheKind::Metadata, ttl),
        }
    }

    pub fn discovery_url(&self) -> &Url {
        &self.discovery_url
    }

    /// Return the cached metadata, fetching it if absent or past its TTL.
    ///
    /// # Errors
    ///
    /// Returns `MetadataError` only when the fetch fails and no document was
    /// ever fetched.
    #[instrument(skip_all)]
    pub async fn get_metadata(&self) -> Result<Arc<ProviderMetadata>, MetadataError> {
        self.cell
            .get(|| self.fetch())
            .await
            .map(|snapshot| snapshot.value)
            .inspect_err(|e| {
                tracing::error!(
                    target: "aad.metadata",
                    error = %e,
                    "Provider metadata unavailable and nothing cached"
                );
            })
    }

    /// Expire the cached document so the next call refetches it. The old
    /// document remains available as a fallback.
    pub async fn invalidate(&self) {
        tracing::debug!(target: "aad.metadata", "Provider metadata invalidated");
        self.cell.invalidate().await;
    }

    async fn fetch(&self) -> Result<ProviderMetadata, MetadataError> {
        tracing::debug!(
            target: "aad.metadata",
            url = %self.discovery_url,
            "Fetching provider metadata"
        );

        let response = self
            .http_client
            .get(self.discovery_url.clone())
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(target: "aad.metadata", error = %e, "Failed to fetch discovery document");
                MetadataError::Request(e.to_string())
            })?;

        if !response.status().is_success() {
            tracing::warn!(
                target: "aad.metadata",
                status = %response.status(),
                "Discovery endpoint returned error"
            );
            return Err(MetadataError::Status(response.status().as_u16()));
        }

        let document: DiscoveryDocument = response.json().await.map_err(|e| {
            tracing::warn!(target: "aad.metadata", error = %e, "Failed to parse discovery document");
            MetadataError::InvalidDocument(e.to_string())
        })?;

        let metadata = parse_document(document, self.discovery_url.scheme() == "http")?;

        tracing::info!(
            target: "aad.metadata",
            issuer = %metadata.issuer,
            "Provider metadata refreshed"
        );

        Ok(metadata)
    }
}

/// Build the HTTP client shared by the metadata cache and key store.
///
/// # Errors
///
/// Returns the builder error if the TLS backend cannot be initialised.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
}

fn parse_document(
    document: DiscoveryDocument,
    allow_plain_http: bool,
) -> Result<ProviderMetadata, MetadataError> {
    let issuer = required_url("issuer", document.issuer)?;
    let jwks_uri = required_url("jwks_uri", document.jwks_uri)?;
    let authorization_endpoint =
        required_url("authorization_endpoint", document.authorization_endpoint)?;
    let token_endpoint = required_url("token_endpoint", document.token_endpoint)?;

    let jwks_url = Url::parse(&jwks_uri)
        .map_err(|e| MetadataError::InvalidDocument(format!("jwks_uri: {e}")))?;
    match jwks_url.scheme() {
        "https" => {}
        "http" if allow_plain_http => {}
        other => {
            return Err(MetadataError::InvalidDocument(format!(
                "jwks_uri must use https, got {other}"
            )))
        }
    }

    Ok(ProviderMetadata {
        issuer,
        jwks_uri,
        authorization_endpoint,
        token_endpoint,
        fetched_at: Utc::now(),
    })
}

fn required_url(field: &'static str, value: Option<String>) -> Result<String, MetadataError> {
    let value = value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| MetadataError::InvalidDocument(format!("{field} is missing")))?;

    // The multi-tenant issuer template is not a valid host until substituted
    let probe = value.replace("{tenantid}", "tenant");
    Url::parse(&probe)
        .map_err(|e| MetadataError::InvalidDocument(format!("{field} is not an absolute URL: {e}")))?;

    Ok(value)
}
