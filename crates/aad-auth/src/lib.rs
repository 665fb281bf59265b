//! Azure AD bearer-token authentication gate.
//!
//! Verifies `Authorization: Bearer` tokens issued by Azure AD (Entra ID)
//! against the provider's published signing keys and returns an
//! authenticated [`Principal`] or a precise [`AuthError`].
//!
//! # Architecture
//!
//! ```text
//! AuthenticationGate -> ProviderMetadataCache -> SigningKeyStore
//!                    -> TokenValidator -> GuestPolicy
//! ```
//!
//! # Modules
//!
//! - `auth` - metadata cache, key store, validator, claims, guest policy
//! - `config` - gate configuration, from code or environment
//! - `errors` - public error taxonomy and internal error types
//! - `gate` - the request entry point
//! - `observability` - metrics

pub mod auth;
pub mod config;
pub mod errors;
pub mod gate;
pub mod observability;

pub use auth::{Principal, ValidatedClaims};
pub use config::{AuthConfig, ConfigError, Tenancy, TokenVersion};
pub use errors::AuthError;
pub use gate::{AuthenticationGate, AuthenticationGateBuilder};
