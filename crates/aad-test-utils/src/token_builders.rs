//! Builder patterns for Azure AD shaped test tokens
//!
//! Produces claim sets that look like real v1.0 and v2.0 access tokens, with
//! knobs for every claim the gate checks.

use crate::crypto_fixtures::TestKeypair;
use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

/// Home tenant used across tests.
pub const TEST_TENANT_ID: &str = "72f988bf-86f1-41af-91ab-2d7cd011db47";

/// A second tenant (partner / guest home).
pub const OTHER_TENANT_ID: &str = "9188040d-6c67-4c5b-b112-36a304b66dad";

/// Application (client) id of the protected API.
pub const TEST_CLIENT_ID: &str = "6e74172b-be56-4843-9ff4-e66a39bb12e3";

/// Issuer of v1.0 tokens for `tenant`.
pub fn v1_issuer(tenant: &str) -> String {
    format!("https://sts.windows.net/{tenant}/")
}

/// Issuer of v2.0 tokens for `tenant`.
pub fn v2_issuer(tenant: &str) -> String {
    format!("https://login.microsoftonline.com/{tenant}/v2.0")
}

/// Builder for Azure AD access token claims
///
/// # Example
/// ```rust,ignore
/// let token = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID)
///     .with_scope("user_impersonation")
///     .expires_in(3600)
///     .sign(&TestKeypair::primary());
/// ```
#[derive(Debug, Clone)]
pub struct AzureTokenBuilder {
    claims: Map<String, Value>,
}

impl AzureTokenBuilder {
    /// A delegated v1.0 token for a home-tenant member.
    pub fn v1(tenant: &str, client_id: &str) -> Self {
        let now = Utc::now().timestamp();
        let mut builder = Self::base(now, tenant);
        builder.set("iss", json!(v1_issuer(tenant)));
        builder.set("aud", json!(format!("api://{client_id}")));
        builder.set("ver", json!("1.0"));
        builder.set("appid", json!("04b07795-8ddb-461a-bbee-02f9e1bf7b46"));
        builder.set("unique_name", json!("ada@contoso.example"));
        builder.set("upn", json!("ada@contoso.example"));
        builder.set("given_name", json!("Ada"));
        builder.set("family_name", json!("Lovelace"));
        builder
    }

    /// A delegated v2.0 token for a home-tenant member.
    pub fn v2(tenant: &str, client_id: &str) -> Self {
        let now = Utc::now().timestamp();
        let mut builder = Self::base(now, tenant);
        builder.set("iss", json!(v2_issuer(tenant)));
        builder.set("aud", json!(client_id));
        builder.set("ver", json!("2.0"));
        builder.set("azp", json!("04b07795-8ddb-461a-bbee-02f9e1bf7b46"));
        builder.set("preferred_username", json!("ada@contoso.example"));
        builder
    }

    fn base(now: i64, tenant: &str) -> Self {
        let claims = json!({
            "sub": "AAAAAAAAAAAAAAAAAAAAAIkzqFVrSaSaFHy782bbtaQ",
            "tid": tenant,
            "oid": "00000000-0000-0000-66f3-3332eca7ea81",
            "name": "Ada Lovelace",
            "scp": "user_impersonation",
            "acct": 0,
            "iat": now - 60,
            "nbf": now - 60,
            "exp": now + 3600,
        });
        Self {
            claims: claims.as_object().cloned().unwrap_or_default(),
        }
    }

    fn set(&mut self, name: &str, value: Value) {
        self.claims.insert(name.to_string(), value);
    }

    /// Set any claim.
    pub fn with_claim(mut self, name: &str, value: Value) -> Self {
        self.set(name, value);
        self
    }

    /// Remove a claim.
    pub fn without_claim(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    pub fn with_issuer(self, issuer: &str) -> Self {
        self.with_claim("iss", json!(issuer))
    }

    /// Set `aud` to a single string.
    pub fn with_audience(self, audience: &str) -> Self {
        self.with_claim("aud", json!(audience))
    }

    /// Set `tid` and rewrite `iss` to match, keeping the token version.
    pub fn for_tenant(self, tenant: &str) -> Self {
        let v1 = self.claims.get("ver").and_then(Value::as_str) == Some("1.0");
        let issuer = if v1 { v1_issuer(tenant) } else { v2_issuer(tenant) };
        self.with_claim("tid", json!(tenant))
            .with_claim("iss", json!(issuer))
    }

    /// Space-separated delegated scopes.
    pub fn with_scope(self, scope: &str) -> Self {
        self.with_claim("scp", json!(scope))
    }

    /// Application-permission token: roles and no `scp`.
    pub fn with_roles(self, roles: &[&str]) -> Self {
        self.without_claim("scp").with_claim("roles", json!(roles))
    }

    /// B2B guest: account type 1 and a foreign identity provider.
    pub fn as_guest(self) -> Self {
        self.with_claim("acct", json!(1))
            .with_claim("idp", json!(v1_issuer(OTHER_TENANT_ID)))
            .with_claim(
                "unique_name",
                json!("ada_contoso.example#EXT#@fabrikam.onmicrosoft.com"),
            )
    }

    /// Set expiration in seconds from now (negative for the past).
    pub fn expires_in(self, seconds: i64) -> Self {
        let exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self.with_claim("exp", json!(exp))
    }

    /// Set not-before in seconds from now.
    pub fn not_before_in(self, seconds: i64) -> Self {
        let nbf = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self.with_claim("nbf", json!(nbf))
    }

    /// Set issued-at in seconds from now.
    pub fn issued_in(self, seconds: i64) -> Self {
        let iat = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self.with_claim("iat", json!(iat))
    }

    /// Build the claims as a JSON value
    pub fn build(self) -> Value {
        Value::Object(self.claims)
    }

    /// Build and sign with RS256 under the keypair's `kid`.
    pub fn sign(self, keypair: &TestKeypair) -> String {
        keypair.sign(&self.build())
    }
}
