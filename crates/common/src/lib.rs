//! Provider-agnostic JWT helpers shared by the AAD gate crates.

#![warn(clippy::pedantic)]

/// Module for JWT utilities (structural decode, header model, time bounds)
pub mod jwt;

/// Module for secret types that prevent accidental logging
pub mod secret;
