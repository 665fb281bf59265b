//! Observability for the authentication gate.
//!
//! Logging goes through `tracing` with per-component targets (`aad.metadata`,
//! `aad.jwks`, `aad.jwt`, `aad.guest`, `aad.gate`); metrics go through the
//! `metrics` facade in [`metrics`].

pub mod metrics;
