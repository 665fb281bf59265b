//! Signing key store for the provider's JSON Web Key Set.
//!
//! The store fetches the JWKS from the `jwks_uri` advertised by the provider
//! metadata and caches it as an immutable [`KeySet`] with a configurable TTL.
//!
//! # Security
//!
//! - Only RSA signing keys (`kty: RSA`, `use` absent or `sig`) are kept
//! - A document with malformed key material or a duplicate `kid` is rejected
//!   as a whole; the previous set keeps being served
//! - An unknown `kid` triggers exactly one forced refresh per key set
//!   generation (provider key rotation), then is remembered as missing so a
//!   flood of forged `kid`s cannot turn into a flood of JWKS fetches

use crate::auth::metadata::ProviderMetadataCache;
use crate::auth::refresh::{RefreshCell, Snapshot};
use crate::errors::KeyStoreError;
use crate::observability::metrics::CacheKind;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::instrument;

/// Upper bound on remembered unknown `kid`s per key set generation.
const MAX_MISSING_KIDS: usize = 256;

/// JSON Web Key as published in the JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA" for Azure AD signing keys).
    pub kty: String,

    /// Key ID - used to select the correct key for verification.
    #[serde(default)]
    pub kid: Option<String>,

    /// RSA modulus (base64url encoded).
    #[serde(default)]
    pub n: Option<String>,

    /// RSA public exponent (base64url encoded).
    #[serde(default)]
    pub e: Option<String>,

    /// Algorithm. Azure AD usually omits it.
    #[serde(default)]
    pub alg: Option<String>,

    /// Key use (should be "sig" for signing).
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,
}

/// JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksResponse {
    pub keys: Vec<Jwk>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Rsa,
}

/// A verification key selected by `kid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKey {
    pub kid: String,
    pub key_type: KeyType,
    n: String,
    e: String,
    /// Algorithm declared by the key, if any.
    pub algorithm: Option<Algorithm>,
}

impl SigningKey {
    /// An RSA key from base64url modulus and exponent.
    ///
    /// The components are not checked here; keys parsed from a JWKS document
    /// are validated by [`KeySet::from_jwks`].
    pub fn rsa(kid: impl Into<String>, n: impl Into<String>, e: impl Into<String>) -> Self {
        Self {
            kid: kid.into(),
            key_type: KeyType::Rsa,
            n: n.into(),
            e: e.into(),
            algorithm: None,
        }
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    /// Build the `jsonwebtoken` verification key.
    ///
    /// # Errors
    ///
    /// Returns the `jsonwebtoken` error if the components do not decode.
    pub fn decoding_key(&self) -> Result<DecodingKey, jsonwebtoken::errors::Error> {
        match self.key_type {
            KeyType::Rsa => DecodingKey::from_rsa_components(&self.n, &self.e),
        }
    }
}

/// The set of usable signing keys, indexed by `kid`.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, SigningKey>,
}

impl KeySet {
    /// Parse a JWKS document.
    ///
    /// Non-signing and non-RSA entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns a description of the first structural problem: an RSA signing
    /// key without a `kid`, with missing or undecodable `n`/`e`, or a
    /// duplicate `kid`.
    pub fn from_jwks(jwks: JwksResponse) -> Result<Self, String> {
        let mut keys = HashMap::with_capacity(jwks.keys.len());

        for jwk in jwks.keys {
            if jwk.key_use.as_deref().is_some_and(|u| u != "sig") {
                tracing::debug!(target: "aad.jwks", kid = ?jwk.kid, "Skipping non-signing key");
                continue;
            }
            if jwk.kty != "RSA" {
                tracing::debug!(target: "aad.jwks", kid = ?jwk.kid, kty = %jwk.kty, "Skipping non-RSA key");
                continue;
            }

            let kid = jwk
                .kid
                .filter(|k| !k.is_empty())
                .ok_or_else(|| "RSA signing key without kid".to_string())?;
            let n = rsa_component(&kid, "n", jwk.n)?;
            let e = rsa_component(&kid, "e", jwk.e)?;

            let algorithm = match jwk.alg.as_deref() {
                None => None,
                Some(alg) => match Algorithm::from_str(alg) {
                    Ok(algorithm) => Some(algorithm),
                    Err(_) => {
                        tracing::debug!(target: "aad.jwks", kid = %kid, alg = %alg, "Skipping key with unknown algorithm");
                        continue;
                    }
                },
            };

            if keys.contains_key(&kid) {
                return Err(format!("duplicate kid {kid}"));
            }

            keys.insert(
                kid.clone(),
                SigningKey {
                    kid,
                    key_type: KeyType::Rsa,
                    n,
                    e,
                    algorithm,
                },
            );
        }

        Ok(Self { keys })
    }

    pub fn get(&self, kid: &str) -> Option<&SigningKey> {
        self.keys.get(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

fn rsa_component(kid: &str, name: &str, value: Option<String>) -> Result<String, String> {
    let value = value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("key {kid} is missing {name}"))?;
    let trimmed = value.trim_end_matches('=');
    match URL_SAFE_NO_PAD.decode(trimmed) {
        Ok(bytes) if !bytes.is_empty() => Ok(trimmed.to_string()),
        _ => Err(format!("key {kid} has malformed {name}")),
    }
}

/// Where the validator obtains verification keys.
#[async_trait]
pub trait SigningKeySource: Send + Sync {
    /// Look up the key for `kid`.
    async fn get_key(&self, kid: &str) -> Result<SigningKey, KeyStoreError>;

    /// Load the key set ahead of the first request.
    async fn warm_up(&self) -> Result<(), KeyStoreError> {
        Ok(())
    }
}

/// `kid`s known to be absent from one key set generation.
#[derive(Default)]
struct MissingKids {
    generation: u64,
    kids: HashSet<String>,
}

/// JWKS-backed [`SigningKeySource`].
pub struct SigningKeyStore {
    metadata: Arc<ProviderMetadataCache>,
    http_client: reqwest::Client,
    cell: RefreshCell<KeySet>,
    missing: Mutex<MissingKids>,
}

impl SigningKeyStore {
    pub fn new(
        metadata: Arc<ProviderMetadataCache>,
        http_client: reqwest::Client,
        ttl: Duration,
    ) -> Self {
        Self {
            metadata,
            http_client,
            cell: RefreshCell::new(CacheKind::Jwks, ttl),
            missing: Mutex::new(MissingKids::default()),
        }
    }

    async fn current(&self) -> Result<Snapshot<KeySet>, KeyStoreError> {
        self.cell
            .get(|| self.fetch())
            .await
            .map_err(KeyStoreError::Unavailable)
    }

    fn is_known_missing(&self, kid: &str, generation: u64) -> bool {
        let missing = self.missing.lock().unwrap_or_else(PoisonError::into_inner);
        missing.generation == generation && missing.kids.contains(kid)
    }

    fn remember_missing(&self, kid: &str, generation: u64) {
        let mut missing = self.missing.lock().unwrap_or_else(PoisonError::into_inner);
        if missing.generation != generation {
            missing.generation = generation;
            missing.kids.clear();
        }
        if missing.kids.len() < MAX_MISSING_KIDS {
            missing.kids.insert(kid.to_string());
        }
    }

    fn miss(keys: &KeySet) -> KeyStoreError {
        if keys.is_empty() {
            KeyStoreError::NoKeysFound
        } else {
            KeyStoreError::KeyNotFound
        }
    }

    async fn fetch(&self) -> Result<KeySet, String> {
        let metadata = self
            .metadata
            .get_metadata()
            .await
            .map_err(|e| e.to_string())?;

        tracing::debug!(target: "aad.jwks", url = %metadata.jwks_uri, "Fetching JWKS");

        let response = self
            .http_client
            .get(&metadata.jwks_uri)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(target: "aad.jwks", error = %e, "Failed to fetch JWKS");
                format!("JWKS request failed: {e}")
            })?;

        if !response.status().is_success() {
            tracing::warn!(
                target: "aad.jwks",
                status = %response.status(),
                "JWKS endpoint returned error"
            );
            return Err(format!("JWKS endpoint returned HTTP {}", response.status()));
        }

        let jwks: JwksResponse = response.json().await.map_err(|e| {
            tracing::warn!(target: "aad.jwks", error = %e, "Failed to parse JWKS response");
            format!("JWKS document is invalid: {e}")
        })?;

        let keys = KeySet::from_jwks(jwks).map_err(|e| {
            tracing::warn!(target: "aad.jwks", error = %e, "Rejected JWKS document");
            format!("JWKS document is invalid: {e}")
        })?;

        tracing::info!(
            target: "aad.jwks",
            key_count = keys.len(),
            "JWKS cache refreshed"
        );

        Ok(keys)
    }
}

#[async_trait]
impl SigningKeySource for SigningKeyStore {
    #[instrument(skip(self), fields(kid = %kid))]
    async fn get_key(&self, kid: &str) -> Result<SigningKey, KeyStoreError> {
        let snapshot = self.current().await?;
        if let Some(key) = snapshot.value.get(kid) {
            tracing::debug!(target: "aad.jwks", kid = %kid, "JWKS cache hit");
            return Ok(key.clone());
        }

        if self.is_known_missing(kid, snapshot.generation) {
            tracing::debug!(target: "aad.jwks", kid = %kid, "Key already known to be missing");
            return Err(Self::miss(&snapshot.value));
        }

        tracing::info!(
            target: "aad.jwks",
            kid = %kid,
            generation = snapshot.generation,
            "Key not found in JWKS, forcing refresh"
        );
        let refreshed = self
            .cell
            .refresh_after(snapshot.generation, || self.fetch())
            .await
            .map_err(KeyStoreError::Unavailable)?;

        if let Some(key) = refreshed.value.get(kid) {
            return Ok(key.clone());
        }

        tracing::warn!(target: "aad.jwks", kid = %kid, "Key not found in JWKS after refresh");
        self.remember_missing(kid, refreshed.generation);
        Err(Self::miss(&refreshed.value))
    }

    async fn warm_up(&self) -> Result<(), KeyStoreError> {
        self.current().await.map(|_| ())
    }
}
