//! Token validation engine.
//!
//! # Components
//!
//! - `metadata` - provider discovery document cache
//! - `jwks` - signing key store backed by the provider's JWKS
//! - `jwt` - token validation against the key store and configuration
//! - `claims` - validated claim set
//! - `guest` - guest classification and the principal returned to callers
//! - `refresh` - single-flight snapshot cell shared by both caches

pub mod claims;
pub mod guest;
pub mod jwks;
pub mod jwt;
pub mod metadata;
mod refresh;

pub use claims::ValidatedClaims;
pub use guest::{GuestPolicy, GuestSignal, Principal};
pub use jwks::{Jwk, JwksResponse, KeySet, KeyType, SigningKey, SigningKeySource, SigningKeyStore};
pub use jwt::TokenValidator;
pub use metadata::{ProviderMetadata, ProviderMetadataCache};
