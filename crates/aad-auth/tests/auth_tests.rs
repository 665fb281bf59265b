//! Authentication gate integration tests.
//!
//! Runs the gate end to end against a mocked Azure AD tenant (discovery
//! document + JWKS served by wiremock) with tokens signed by fixed RSA keys.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use aad_auth::auth::{SigningKey, SigningKeySource};
use aad_auth::errors::KeyStoreError;
use aad_auth::{AuthError, AuthenticationGate, TokenVersion};
use aad_test_utils::*;
use anyhow::Result;
use async_trait::async_trait;
use jsonwebtoken::Algorithm;
use serde_json::json;
use std::sync::Arc;
use wiremock::ResponseTemplate;

fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

fn v1_gate(idp: &MockIdentityProvider) -> AuthenticationGate {
    AuthenticationGate::new(idp.config_v1()).expect("valid test config")
}

// ============================================================================
// Successful authentication
// ============================================================================

#[tokio::test]
async fn test_normal_user_authenticates() -> Result<()> {
    let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
    let gate = v1_gate(&idp);

    let claims = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID).build();
    let token = TestKeypair::primary().sign(&claims);

    let principal = gate.authenticate(&bearer(&token)).await?;

    assert!(!principal.is_guest);
    assert_eq!(principal.claims.tid, TEST_TENANT_ID);
    assert_eq!(principal.claims.iss, v1_issuer(TEST_TENANT_ID));
    assert_eq!(principal.claims.aud, vec![format!("api://{TEST_CLIENT_ID}")]);
    assert_eq!(principal.claims.ver.as_deref(), Some("1.0"));
    assert!(principal.claims.has_scope("user_impersonation"));
    // Principal claims equal the token's decoded claims
    assert_eq!(Some(&principal.claims.raw), claims.as_object());
    Ok(())
}

#[tokio::test]
async fn test_principal_keeps_access_token_for_on_behalf_of() -> Result<()> {
    use common::secret::ExposeSecret;

    let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
    let gate = v1_gate(&idp);
    let token = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID).sign(&TestKeypair::primary());

    let principal = gate.authenticate(&bearer(&token)).await?;

    assert_eq!(principal.access_token().expose_secret(), token);
    assert!(!format!("{principal:?}").contains(&token));
    Ok(())
}

#[tokio::test]
async fn test_bearer_scheme_is_case_insensitive() -> Result<()> {
    let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
    let gate = v1_gate(&idp);
    let token = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID).sign(&TestKeypair::primary());

    gate.authenticate(&format!("bearer {token}")).await?;
    gate.authenticate(&format!("  BEARER   {token}  ")).await?;
    Ok(())
}

#[tokio::test]
async fn test_multi_tenant_v2_accepts_any_tenant() -> Result<()> {
    let idp = MockIdentityProvider::start().await;
    idp.mount_discovery_at(
        &MockIdentityProvider::discovery_path("common", TokenVersion::V2),
        ResponseTemplate::new(200).set_body_json(idp.v2_common_discovery_document()),
    )
    .await;
    idp.mount_jwks(&[TestKeypair::primary()]).await;
    let gate = AuthenticationGate::new(idp.config_v2_multi_tenant())?;

    for tenant in [TEST_TENANT_ID, OTHER_TENANT_ID] {
        let token = AzureTokenBuilder::v2(tenant, TEST_CLIENT_ID).sign(&TestKeypair::primary());
        let principal = gate.authenticate(&bearer(&token)).await?;
        assert_eq!(principal.claims.tid, tenant);
        assert_eq!(principal.claims.iss, v2_issuer(tenant));
    }
    Ok(())
}

#[tokio::test]
async fn test_multi_tenant_allow_list() -> Result<()> {
    let idp = MockIdentityProvider::start().await;
    idp.mount_discovery_at(
        &MockIdentityProvider::discovery_path("common", TokenVersion::V2),
        ResponseTemplate::new(200).set_body_json(idp.v2_common_discovery_document()),
    )
    .await;
    idp.mount_jwks(&[TestKeypair::primary()]).await;
    let gate = AuthenticationGate::new(
        idp.config_v2_multi_tenant()
            .with_accepted_tenants(vec![TEST_TENANT_ID.to_string()]),
    )?;

    let allowed = AzureTokenBuilder::v2(TEST_TENANT_ID, TEST_CLIENT_ID).sign(&TestKeypair::primary());
    assert!(gate.authenticate(&bearer(&allowed)).await.is_ok());

    let other = AzureTokenBuilder::v2(OTHER_TENANT_ID, TEST_CLIENT_ID).sign(&TestKeypair::primary());
    assert_eq!(
        gate.authenticate(&bearer(&other)).await.unwrap_err(),
        AuthError::InvalidClaims
    );
    Ok(())
}

#[tokio::test]
async fn test_additional_audience_accepted() -> Result<()> {
    let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
    let gate = AuthenticationGate::new(
        idp.config_v1()
            .with_additional_audiences(vec![TEST_CLIENT_ID.to_string()]),
    )?;

    let token = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID)
        .with_claim("aud", json!(["https://graph.example", TEST_CLIENT_ID]))
        .sign(&TestKeypair::primary());
    let principal = gate.authenticate(&bearer(&token)).await?;
    assert_eq!(principal.claims.aud.len(), 2);
    Ok(())
}

// ============================================================================
// Header handling
// ============================================================================

#[tokio::test]
async fn test_missing_or_malformed_header() -> Result<()> {
    let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
    let gate = v1_gate(&idp);

    for header in ["", "Bearer", "Bearer   ", "Basic dXNlcjpwYXNz", "Bearer a b"] {
        assert_eq!(
            gate.authenticate(header).await.unwrap_err(),
            AuthError::MissingOrMalformedHeader,
            "header {header:?}"
        );
    }
    // Rejected before any provider traffic
    assert_eq!(idp.discovery_requests().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_malformed_token() -> Result<()> {
    let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
    let gate = v1_gate(&idp);

    for token in ["not-a-jwt", "a.b", "a.b.c.d", "!!!.???.***"] {
        assert_eq!(
            gate.authenticate(&bearer(token)).await.unwrap_err(),
            AuthError::MalformedToken,
            "token {token:?}"
        );
    }
    assert_eq!(idp.jwks_requests().await, 0);
    Ok(())
}

// ============================================================================
// Algorithm confusion
// ============================================================================

#[tokio::test]
async fn test_hs256_token_rejected() -> Result<()> {
    let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
    let gate = v1_gate(&idp);

    let claims = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID).build();
    let forged = sign_hs256_with_public_key(&TestKeypair::primary(), &claims);

    assert_eq!(
        gate.authenticate(&bearer(&forged)).await.unwrap_err(),
        AuthError::UnsupportedAlgorithm
    );
    // No key lookup for a rejected algorithm
    assert_eq!(idp.jwks_requests().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_alg_none_token_rejected() -> Result<()> {
    let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
    let gate = v1_gate(&idp);

    let claims = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID).build();
    let unsigned = unsigned_token(PRIMARY_KID, &claims);

    assert_eq!(
        gate.authenticate(&bearer(&unsigned)).await.unwrap_err(),
        AuthError::UnsupportedAlgorithm
    );
    Ok(())
}

#[tokio::test]
async fn test_unconfigured_rsa_algorithm_rejected() -> Result<()> {
    let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
    let gate = v1_gate(&idp);

    let claims = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID).build();
    let token = TestKeypair::primary().sign_with(Algorithm::RS512, Some(PRIMARY_KID), &claims);

    assert_eq!(
        gate.authenticate(&bearer(&token)).await.unwrap_err(),
        AuthError::UnsupportedAlgorithm
    );
    Ok(())
}

#[tokio::test]
async fn test_configured_rs512_accepted() -> Result<()> {
    let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
    let gate = AuthenticationGate::new(idp.config_v1().with_signing_algorithm(Algorithm::RS512))?;

    let claims = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID).build();
    let token = TestKeypair::primary().sign_with(Algorithm::RS512, Some(PRIMARY_KID), &claims);

    gate.authenticate(&bearer(&token)).await?;
    Ok(())
}

// ============================================================================
// Key selection and signature
// ============================================================================

#[tokio::test]
async fn test_no_signing_keys_found() -> Result<()> {
    let idp = MockIdentityProvider::start().await;
    idp.mount_discovery(idp.v1_discovery_document(TEST_TENANT_ID))
        .await;
    idp.mount_empty_jwks().await;
    let gate = v1_gate(&idp);

    let token = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID).sign(&TestKeypair::primary());
    let err = gate.authenticate(&bearer(&token)).await.unwrap_err();

    assert_eq!(err, AuthError::NoSigningKeysFound);
    assert_eq!(
        err.to_string(),
        "Unable to verify token, no signing keys found"
    );
    Ok(())
}

#[tokio::test]
async fn test_unknown_kid_fails_after_one_forced_refresh() -> Result<()> {
    let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
    let gate = v1_gate(&idp);

    let token = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID).sign(&TestKeypair::rotated());
    let err = gate.authenticate(&bearer(&token)).await.unwrap_err();

    assert_eq!(err, AuthError::UnableToValidate);
    assert_eq!(err.to_string(), "Unable to validate token");
    // Initial fetch plus exactly one forced refresh
    assert_eq!(idp.jwks_requests().await, 2);

    // The same unknown kid does not trigger more fetches
    let again = gate.authenticate(&bearer(&token)).await.unwrap_err();
    assert_eq!(again, AuthError::UnableToValidate);
    assert_eq!(idp.jwks_requests().await, 2);
    Ok(())
}

#[tokio::test]
async fn test_key_rotation_picked_up_by_forced_refresh() -> Result<()> {
    let idp = MockIdentityProvider::start().await;
    idp.mount_discovery(idp.v1_discovery_document(TEST_TENANT_ID))
        .await;
    idp.mount_jwks_rotation(
        &[TestKeypair::primary()],
        1,
        &[TestKeypair::primary(), TestKeypair::rotated()],
    )
    .await;
    let gate = v1_gate(&idp);

    let old = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID).sign(&TestKeypair::primary());
    gate.authenticate(&bearer(&old)).await?;
    assert_eq!(idp.jwks_requests().await, 1);

    let new = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID).sign(&TestKeypair::rotated());
    gate.authenticate(&bearer(&new)).await?;
    assert_eq!(idp.jwks_requests().await, 2);

    // Both keys now served from cache
    gate.authenticate(&bearer(&old)).await?;
    gate.authenticate(&bearer(&new)).await?;
    assert_eq!(idp.jwks_requests().await, 2);
    Ok(())
}

#[tokio::test]
async fn test_token_without_kid_unable_to_validate() -> Result<()> {
    let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
    let gate = v1_gate(&idp);

    let claims = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID).build();
    let token = TestKeypair::primary().sign_with(Algorithm::RS256, None, &claims);

    assert_eq!(
        gate.authenticate(&bearer(&token)).await.unwrap_err(),
        AuthError::UnableToValidate
    );
    Ok(())
}

#[tokio::test]
async fn test_signature_from_wrong_key_is_invalid() -> Result<()> {
    let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
    let gate = v1_gate(&idp);

    // Rotated key material claiming to be the primary key
    let impostor = TestKeypair::rotated().with_kid(PRIMARY_KID);
    let token = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID).sign(&impostor);

    let err = gate.authenticate(&bearer(&token)).await.unwrap_err();
    assert_eq!(err, AuthError::InvalidSignature);
    Ok(())
}

#[tokio::test]
async fn test_tampered_payload_is_invalid_signature() -> Result<()> {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

    let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
    let gate = v1_gate(&idp);

    let token = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID).sign(&TestKeypair::primary());
    let (header, rest) = token.split_once('.').unwrap();
    let (_, signature) = rest.split_once('.').unwrap();
    let elevated = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID)
        .with_roles(&["Admin"])
        .build();
    let tampered = format!(
        "{header}.{}.{signature}",
        URL_SAFE_NO_PAD.encode(elevated.to_string())
    );

    assert_eq!(
        gate.authenticate(&bearer(&tampered)).await.unwrap_err(),
        AuthError::InvalidSignature
    );
    Ok(())
}

/// Key source that hands out corrupted key material.
struct CorruptedKeySource;

#[async_trait]
impl SigningKeySource for CorruptedKeySource {
    async fn get_key(&self, kid: &str) -> Result<SigningKey, KeyStoreError> {
        Ok(SigningKey::rsa(kid, "%%%not-base64%%%", RSA_EXPONENT))
    }
}

#[tokio::test]
async fn test_corrupted_key_material_unable_to_process() -> Result<()> {
    let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
    let gate = AuthenticationGate::builder(idp.config_v1())
        .with_key_source(Arc::new(CorruptedKeySource))
        .build()?;

    let token = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID).sign(&TestKeypair::primary());
    let err = gate.authenticate(&bearer(&token)).await.unwrap_err();

    assert_eq!(err, AuthError::UnableToProcessToken);
    assert_eq!(err.to_string(), "Unable to process token");
    Ok(())
}

// ============================================================================
// Time bounds
// ============================================================================

#[tokio::test]
async fn test_expired_token() -> Result<()> {
    let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
    let gate = v1_gate(&idp);

    let expired = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID)
        .expires_in(-1)
        .sign(&TestKeypair::primary());
    let err = gate.authenticate(&bearer(&expired)).await.unwrap_err();
    assert_eq!(err, AuthError::TokenExpired);
    assert_eq!(err.to_string(), "Token signature has expired");

    let valid = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID)
        .expires_in(3600)
        .sign(&TestKeypair::primary());
    assert!(gate.authenticate(&bearer(&valid)).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn test_expired_within_clock_skew_accepted() -> Result<()> {
    let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
    let gate = AuthenticationGate::new(
        idp.config_v1()
            .with_clock_skew(std::time::Duration::from_secs(120)),
    )?;

    let token = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID)
        .expires_in(-30)
        .sign(&TestKeypair::primary());
    assert!(gate.authenticate(&bearer(&token)).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn test_not_yet_valid_token() -> Result<()> {
    let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
    let gate = v1_gate(&idp);

    let early = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID)
        .not_before_in(600)
        .sign(&TestKeypair::primary());
    assert_eq!(
        gate.authenticate(&bearer(&early)).await.unwrap_err(),
        AuthError::TokenNotYetValid
    );

    let future_iat = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID)
        .issued_in(600)
        .sign(&TestKeypair::primary());
    assert_eq!(
        gate.authenticate(&bearer(&future_iat)).await.unwrap_err(),
        AuthError::TokenNotYetValid
    );
    Ok(())
}

#[tokio::test]
async fn test_missing_time_claim_is_invalid_claims() -> Result<()> {
    let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
    let gate = v1_gate(&idp);

    for claim in ["exp", "nbf", "iat"] {
        let token = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID)
            .without_claim(claim)
            .sign(&TestKeypair::primary());
        assert_eq!(
            gate.authenticate(&bearer(&token)).await.unwrap_err(),
            AuthError::InvalidClaims,
            "missing {claim}"
        );
    }
    Ok(())
}

// ============================================================================
// Claim checks
// ============================================================================

#[tokio::test]
async fn test_invalid_claims() -> Result<()> {
    let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
    let gate = v1_gate(&idp);
    let builder = || AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID);

    let cases = [
        ("wrong audience", builder().with_audience("api://someone-else")),
        ("v2 audience on v1 app", builder().with_audience(TEST_CLIENT_ID)),
        ("wrong issuer", builder().with_issuer("https://evil.example/")),
        ("v2 issuer on v1 metadata", builder().with_issuer(&v2_issuer(TEST_TENANT_ID))),
        ("foreign tenant", builder().for_tenant(OTHER_TENANT_ID)),
        ("missing sub", builder().without_claim("sub")),
        ("missing tid", builder().without_claim("tid")),
        ("missing aud", builder().without_claim("aud")),
    ];

    for (name, case) in cases {
        let token = case.sign(&TestKeypair::primary());
        let err = gate.authenticate(&bearer(&token)).await.unwrap_err();
        assert_eq!(err, AuthError::InvalidClaims, "{name}");
        assert_eq!(err.to_string(), "Token contains invalid claims");
    }
    Ok(())
}

#[tokio::test]
async fn test_additional_tenant_accepted_in_single_tenant_mode() -> Result<()> {
    let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
    let gate = AuthenticationGate::new(
        idp.config_v1()
            .with_accepted_tenants(vec![OTHER_TENANT_ID.to_string()]),
    )?;

    let partner = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID)
        .for_tenant(OTHER_TENANT_ID)
        .sign(&TestKeypair::primary());
    let principal = gate.authenticate(&bearer(&partner)).await?;
    assert_eq!(principal.claims.tid, OTHER_TENANT_ID);
    assert_eq!(principal.claims.iss, v1_issuer(OTHER_TENANT_ID));

    // Partner tid under the home tenant's issuer is not a genuine token
    let mismatched = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID)
        .with_claim("tid", json!(OTHER_TENANT_ID))
        .sign(&TestKeypair::primary());
    assert_eq!(
        gate.authenticate(&bearer(&mismatched)).await.unwrap_err(),
        AuthError::InvalidClaims
    );
    Ok(())
}

#[tokio::test]
async fn test_foreign_tenant_signal_marks_partner_as_guest() -> Result<()> {
    use aad_auth::auth::GuestSignal;

    let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
    let config = || {
        idp.config_v1()
            .with_accepted_tenants(vec![OTHER_TENANT_ID.to_string()])
            .with_guest_signals(vec![GuestSignal::ForeignTenant])
    };
    let partner = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID)
        .for_tenant(OTHER_TENANT_ID)
        .sign(&TestKeypair::primary());

    let denying = AuthenticationGate::new(config())?;
    assert_eq!(
        denying.authenticate(&bearer(&partner)).await.unwrap_err(),
        AuthError::GuestNotAllowed
    );

    let allowing = AuthenticationGate::new(config().with_allow_guest_users(true))?;
    let principal = allowing.authenticate(&bearer(&partner)).await?;
    assert!(principal.is_guest);

    let member = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID).sign(&TestKeypair::primary());
    assert!(!allowing.authenticate(&bearer(&member)).await?.is_guest);
    Ok(())
}

#[tokio::test]
async fn test_required_scope_or_role() -> Result<()> {
    let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
    let gate = AuthenticationGate::new(
        idp.config_v1()
            .with_required_scopes(vec!["Files.Read".to_string()])
            .with_required_roles(vec!["Files.Read.All".to_string()]),
    )?;
    let builder = || AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID);

    let delegated = builder()
        .with_scope("user_impersonation Files.Read")
        .sign(&TestKeypair::primary());
    assert!(gate.authenticate(&bearer(&delegated)).await.is_ok());

    let application = builder()
        .with_roles(&["Files.Read.All"])
        .sign(&TestKeypair::primary());
    assert!(gate.authenticate(&bearer(&application)).await.is_ok());

    let neither = builder()
        .with_scope("user_impersonation")
        .sign(&TestKeypair::primary());
    assert_eq!(
        gate.authenticate(&bearer(&neither)).await.unwrap_err(),
        AuthError::InvalidClaims
    );
    Ok(())
}

// ============================================================================
// Guest policy
// ============================================================================

#[tokio::test]
async fn test_guest_not_allowed() -> Result<()> {
    let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
    let gate = v1_gate(&idp);

    let token = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID)
        .as_guest()
        .sign(&TestKeypair::primary());
    let err = gate.authenticate(&bearer(&token)).await.unwrap_err();

    assert_eq!(err, AuthError::GuestNotAllowed);
    assert_eq!(err.to_string(), "Guest users not allowed");
    Ok(())
}

#[tokio::test]
async fn test_guest_allowed_when_enabled() -> Result<()> {
    let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
    let gate = AuthenticationGate::new(idp.config_v1().with_allow_guest_users(true))?;

    let token = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID)
        .as_guest()
        .sign(&TestKeypair::primary());
    let principal = gate.authenticate(&bearer(&token)).await?;

    assert!(principal.is_guest);
    Ok(())
}

#[tokio::test]
async fn test_guest_classification_is_idempotent() -> Result<()> {
    let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
    let config = idp.config_v1().with_allow_guest_users(true);
    let policy = aad_auth::auth::GuestPolicy::from_config(&config);
    let gate = AuthenticationGate::new(config)?;

    for builder in [
        AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID),
        AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID).as_guest(),
    ] {
        let token = builder.sign(&TestKeypair::primary());
        let principal = gate.authenticate(&bearer(&token)).await?;
        assert_eq!(policy.is_guest(&principal.claims), principal.is_guest);
        assert_eq!(policy.is_guest(&principal.claims), policy.is_guest(&principal.claims));
    }
    Ok(())
}

// ============================================================================
// Provider failures
// ============================================================================

#[tokio::test]
async fn test_discovery_failure_when_cold() -> Result<()> {
    let idp = MockIdentityProvider::start().await;
    idp.mount_discovery_at(
        &MockIdentityProvider::discovery_path(TEST_TENANT_ID, TokenVersion::V1),
        ResponseTemplate::new(500),
    )
    .await;
    let gate = v1_gate(&idp);

    let token = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID).sign(&TestKeypair::primary());
    let err = gate.authenticate(&bearer(&token)).await.unwrap_err();

    assert_eq!(err, AuthError::DiscoveryFailed);
    assert!(!err.to_string().contains(&idp.uri()));
    Ok(())
}

#[tokio::test]
async fn test_invalid_discovery_document_is_discovery_failure() -> Result<()> {
    let idp = MockIdentityProvider::start().await;
    idp.mount_discovery(json!({"issuer": v1_issuer(TEST_TENANT_ID)}))
        .await;
    let gate = v1_gate(&idp);

    let token = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID).sign(&TestKeypair::primary());
    assert_eq!(
        gate.authenticate(&bearer(&token)).await.unwrap_err(),
        AuthError::DiscoveryFailed
    );
    Ok(())
}

#[tokio::test]
async fn test_jwks_failure_when_cold_is_discovery_failure() -> Result<()> {
    let idp = MockIdentityProvider::start().await;
    idp.mount_discovery(idp.v1_discovery_document(TEST_TENANT_ID))
        .await;
    idp.mount_jwks_response(ResponseTemplate::new(503)).await;
    let gate = v1_gate(&idp);

    let token = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID).sign(&TestKeypair::primary());
    assert_eq!(
        gate.authenticate(&bearer(&token)).await.unwrap_err(),
        AuthError::DiscoveryFailed
    );
    Ok(())
}

#[tokio::test]
async fn test_jwks_with_duplicate_kid_rejected() -> Result<()> {
    let idp = MockIdentityProvider::start().await;
    idp.mount_discovery(idp.v1_discovery_document(TEST_TENANT_ID))
        .await;
    idp.mount_jwks_response(ResponseTemplate::new(200).set_body_json(json!({
        "keys": [TestKeypair::primary().jwk(), TestKeypair::primary().jwk()]
    })))
    .await;
    let gate = v1_gate(&idp);

    let token = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID).sign(&TestKeypair::primary());
    assert_eq!(
        gate.authenticate(&bearer(&token)).await.unwrap_err(),
        AuthError::DiscoveryFailed
    );
    Ok(())
}
