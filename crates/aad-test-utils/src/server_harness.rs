//! Mock identity provider for integration tests
//!
//! Wraps a wiremock `MockServer` that serves an OpenID discovery document and
//! a JWKS the way Azure AD does, and counts the requests each endpoint
//! receives so tests can assert single-flight and rotation behaviour.

use crate::crypto_fixtures::{jwks_document, TestKeypair};
use crate::token_builders::{v1_issuer, TEST_CLIENT_ID, TEST_TENANT_ID};
use aad_auth::{AuthConfig, TokenVersion};
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path the mock serves the key set on.
pub const JWKS_PATH: &str = "/common/discovery/keys";

/// Mock Azure AD tenant endpoint
///
/// # Example
/// ```rust,ignore
/// let idp = MockIdentityProvider::start().await;
/// idp.mount_discovery(idp.v1_discovery_document(TEST_TENANT_ID)).await;
/// idp.mount_jwks(&[TestKeypair::primary()]).await;
///
/// let gate = AuthenticationGate::new(idp.config_v1())?;
/// ```
pub struct MockIdentityProvider {
    server: MockServer,
}

impl MockIdentityProvider {
    /// Start an empty mock server on a random local port.
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Start a provider for the v1 single-tenant setup with `keys` published.
    pub async fn with_keys(keys: &[TestKeypair]) -> Self {
        let idp = Self::start().await;
        idp.mount_discovery(idp.v1_discovery_document(TEST_TENANT_ID))
            .await;
        idp.mount_jwks(keys).await;
        idp
    }

    /// The underlying wiremock server, for custom mocks.
    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Base URL, usable as the gate's authority.
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn jwks_uri(&self) -> String {
        format!("{}{}", self.server.uri(), JWKS_PATH)
    }

    /// Discovery document path for `tenant` and `version`.
    pub fn discovery_path(tenant: &str, version: TokenVersion) -> String {
        match version {
            TokenVersion::V1 => format!("/{tenant}/.well-known/openid-configuration"),
            TokenVersion::V2 => format!("/{tenant}/v2.0/.well-known/openid-configuration"),
        }
    }

    /// Discovery document for a v1 single-tenant app.
    pub fn v1_discovery_document(&self, tenant: &str) -> Value {
        self.discovery_document(&v1_issuer(tenant))
    }

    /// Discovery document for the multi-tenant v2 endpoint (`{tenantid}` issuer).
    pub fn v2_common_discovery_document(&self) -> Value {
        self.discovery_document("https://login.microsoftonline.com/{tenantid}/v2.0")
    }

    /// Discovery document with the given issuer and this server's JWKS.
    pub fn discovery_document(&self, issuer: &str) -> Value {
        let base = self.server.uri();
        json!({
            "issuer": issuer,
            "jwks_uri": self.jwks_uri(),
            "authorization_endpoint": format!("{base}/oauth2/authorize"),
            "token_endpoint": format!("{base}/oauth2/token"),
            "token_endpoint_auth_methods_supported": ["client_secret_post", "private_key_jwt"],
            "response_types_supported": ["code", "id_token", "code id_token"],
            "id_token_signing_alg_values_supported": ["RS256"],
        })
    }

    /// Serve `document` at the v1 discovery path of the home tenant.
    pub async fn mount_discovery(&self, document: Value) {
        self.mount_discovery_at(
            &Self::discovery_path(TEST_TENANT_ID, TokenVersion::V1),
            ResponseTemplate::new(200).set_body_json(document),
        )
        .await;
    }

    /// Serve an arbitrary response at a discovery path.
    pub async fn mount_discovery_at(&self, discovery_path: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(discovery_path.to_string()))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    /// Publish `keys` as the JWKS.
    pub async fn mount_jwks(&self, keys: &[TestKeypair]) {
        self.mount_jwks_response(ResponseTemplate::new(200).set_body_json(jwks_document(keys)))
            .await;
    }

    /// Publish an empty key set.
    pub async fn mount_empty_jwks(&self) {
        self.mount_jwks_response(ResponseTemplate::new(200).set_body_json(json!({"keys": []})))
            .await;
    }

    /// Serve any response at the JWKS path.
    pub async fn mount_jwks_response(&self, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    /// Serve `first` for the first `times` JWKS requests, then `keys`.
    ///
    /// Models a key rotation that happens after the gate's first fetch.
    pub async fn mount_jwks_rotation(&self, first: &[TestKeypair], times: u64, then: &[TestKeypair]) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_document(first)))
            .up_to_n_times(times)
            .with_priority(1)
            .mount(&self.server)
            .await;
        self.mount_jwks(then).await;
    }

    /// Drop every mock; subsequent requests get 404.
    pub async fn reset(&self) {
        self.server.reset().await;
    }

    /// Number of requests received on `request_path`.
    pub async fn request_count(&self, request_path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == request_path)
            .count()
    }

    /// Number of JWKS fetches received.
    pub async fn jwks_requests(&self) -> usize {
        self.request_count(JWKS_PATH).await
    }

    /// Number of discovery fetches received for the v1 home tenant path.
    pub async fn discovery_requests(&self) -> usize {
        self.request_count(&Self::discovery_path(TEST_TENANT_ID, TokenVersion::V1))
            .await
    }

    /// Gate configuration for a v1 single-tenant app pointed at this server.
    pub fn config_v1(&self) -> AuthConfig {
        AuthConfig::single_tenant(TEST_CLIENT_ID, TEST_TENANT_ID)
            .with_token_version(TokenVersion::V1)
            .with_authority(self.uri())
            .with_fetch_timeout(Duration::from_secs(2))
    }

    /// Gate configuration for a v2 multi-tenant app pointed at this server.
    pub fn config_v2_multi_tenant(&self) -> AuthConfig {
        AuthConfig::multi_tenant(TEST_CLIENT_ID)
            .with_authority(self.uri())
            .with_fetch_timeout(Duration::from_secs(2))
    }
}
