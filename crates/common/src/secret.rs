//! Secret types for protecting bearer tokens from accidental logging.
//!
//! Re-exports the [`secrecy`] types used by the gate. A validated principal
//! keeps the access token it was built from (callers need it for
//! on-behalf-of exchanges), and that token must never show up in `{:?}`
//! output or a tracing field.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct Presented {
//!     scheme: String,
//!     token: SecretString,
//! }
//!
//! let presented = Presented {
//!     scheme: "Bearer".to_string(),
//!     token: SecretString::from("eyJhbGciOiJSUzI1NiJ9.e30.c2ln"),
//! };
//!
//! assert!(!format!("{presented:?}").contains("eyJhbGci"));
//! assert_eq!(presented.token.expose_secret(), "eyJhbGciOiJSUzI1NiJ9.e30.c2ln");
//! ```

pub use secrecy::{ExposeSecret, SecretString};
