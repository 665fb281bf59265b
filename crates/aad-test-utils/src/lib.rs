//! # AAD Test Utilities
//!
//! Shared test utilities for the authentication gate.
//!
//! This crate provides:
//! - Deterministic crypto fixtures (fixed RSA keys for reproducible tests)
//! - Azure AD shaped token builders (v1.0 and v2.0 claim sets)
//! - A wiremock-backed mock identity provider with request counting
//!
//! ## Usage
//!
//! ```rust,ignore
//! use aad_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let idp = MockIdentityProvider::with_keys(&[TestKeypair::primary()]).await;
//!     let gate = AuthenticationGate::new(idp.config_v1()).unwrap();
//!
//!     let token = AzureTokenBuilder::v1(TEST_TENANT_ID, TEST_CLIENT_ID)
//!         .sign(&TestKeypair::primary());
//!
//!     let principal = gate.authenticate(&format!("Bearer {token}")).await.unwrap();
//!     assert!(!principal.is_guest);
//! }
//! ```

pub mod crypto_fixtures;
pub mod server_harness;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use server_harness::*;
pub use token_builders::*;
