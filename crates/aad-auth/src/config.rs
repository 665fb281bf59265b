//! Authentication gate configuration.
//!
//! The gate consumes an already-validated [`AuthConfig`]. It can be built in
//! code (`AuthConfig::single_tenant` / `AuthConfig::multi_tenant` plus the
//! `with_*` builders) or loaded from environment variables.

use crate::auth::guest::GuestSignal;
use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use jsonwebtoken::Algorithm;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default identity provider authority.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Default provider metadata TTL (24 hours).
pub const DEFAULT_METADATA_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default signing key set TTL (24 hours). Rotation is also picked up on
/// the first unknown `kid`.
pub const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default timeout for discovery and JWKS fetches.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Tenant segment used in the discovery URL of multi-tenant applications.
const MULTI_TENANT_SEGMENT: &str = "common";

/// Access token version the application is registered for.
///
/// Decides the discovery document path and the audience the provider
/// writes into tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenVersion {
    /// v1.0 tokens: audience `api://{client_id}`, issuer `https://sts.windows.net/{tid}/`.
    V1,
    /// v2.0 tokens: audience `{client_id}`, issuer `{authority}/{tid}/v2.0`.
    V2,
}

/// Which tenants may present tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tenancy {
    /// The application lives in one home tenant. `additional_tenants` are
    /// accepted as well (cross-tenant principals).
    Single {
        tenant_id: String,
        additional_tenants: Vec<String>,
    },
    /// Any tenant may sign in. An empty `allowed_tenants` accepts every tenant.
    Multi { allowed_tenants: Vec<String> },
}

/// Gate configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// Application (client) id of the protected API.
    pub app_client_id: String,

    /// Accepted tenants.
    pub tenancy: Tenancy,

    /// Token version the app registration issues.
    pub token_version: TokenVersion,

    /// Identity provider authority (scheme + host, no tenant).
    pub authority: String,

    /// Append `?appid={client_id}` to the discovery URL so the provider
    /// reports the issuer that matches the app's token version.
    pub openid_config_use_app_id: bool,

    /// Audiences accepted in addition to the derived one.
    pub additional_audiences: Vec<String>,

    /// Delegated scopes a token must carry (all of them).
    pub required_scopes: Vec<String>,

    /// Application roles a token must carry (all of them).
    pub required_roles: Vec<String>,

    /// Whether guest principals are allowed through.
    pub allow_guest_users: bool,

    /// Signals that mark a principal as a guest.
    pub guest_signals: Vec<GuestSignal>,

    /// The only signing algorithm accepted in token headers.
    pub signing_algorithm: Algorithm,

    /// How long provider metadata is served before a refresh.
    pub metadata_ttl: Duration,

    /// How long the signing key set is served before a refresh.
    pub jwks_ttl: Duration,

    /// Upper bound on each discovery/JWKS fetch.
    pub fetch_timeout: Duration,

    /// Tolerance applied to `exp`, `nbf` and `iat`.
    pub clock_skew: Duration,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("app_client_id", &self.app_client_id)
            .field("tenancy", &self.tenancy)
            .field("token_version", &self.token_version)
            .field("authority", &self.authority)
            .field("openid_config_use_app_id", &self.openid_config_use_app_id)
            .field("additional_audiences", &self.additional_audiences)
            .field("required_scopes", &self.required_scopes)
            .field("required_roles", &self.required_roles)
            .field("allow_guest_users", &self.allow_guest_users)
            .field("guest_signals", &self.guest_signals)
            .field("signing_algorithm", &self.signing_algorithm)
            .field("metadata_ttl", &self.metadata_ttl)
            .field("jwks_ttl", &self.jwks_ttl)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("clock_skew", &self.clock_skew)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid tenant configuration: {0}")]
    InvalidTenancy(String),

    #[error("Invalid client id: {0}")]
    InvalidClientId(String),

    #[error("Invalid token version: {0}")]
    InvalidTokenVersion(String),

    #[error("Invalid authority: {0}")]
    InvalidAuthority(String),

    #[error("Invalid signing algorithm: {0}")]
    InvalidSigningAlgorithm(String),

    #[error("Invalid guest signal: {0}")]
    InvalidGuestSignal(String),

    #[error("Invalid boolean for {0}")]
    InvalidFlag(String),

    #[error("Invalid duration configuration: {0}")]
    InvalidDuration(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

impl AuthConfig {
    /// Configuration for an API registered in a single home tenant.
    pub fn single_tenant(app_client_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self::with_tenancy(
            app_client_id.into(),
            Tenancy::Single {
                tenant_id: tenant_id.into(),
                additional_tenants: Vec::new(),
            },
        )
    }

    /// Configuration for a multi-tenant API accepting every tenant.
    pub fn multi_tenant(app_client_id: impl Into<String>) -> Self {
        Self::with_tenancy(
            app_client_id.into(),
            Tenancy::Multi {
                allowed_tenants: Vec::new(),
            },
        )
    }

    fn with_tenancy(app_client_id: String, tenancy: Tenancy) -> Self {
        Self {
            app_client_id,
            tenancy,
            token_version: TokenVersion::V2,
            authority: DEFAULT_AUTHORITY.to_string(),
            openid_config_use_app_id: false,
            additional_audiences: Vec::new(),
            required_scopes: Vec::new(),
            required_roles: Vec::new(),
            allow_guest_users: false,
            guest_signals: GuestSignal::defaults(),
            signing_algorithm: Algorithm::RS256,
            metadata_ttl: DEFAULT_METADATA_TTL,
            jwks_ttl: DEFAULT_JWKS_TTL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            clock_skew: DEFAULT_CLOCK_SKEW,
        }
    }

    pub fn with_token_version(mut self, version: TokenVersion) -> Self {
        self.token_version = version;
        self
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    pub fn with_openid_config_use_app_id(mut self, enabled: bool) -> Self {
        self.openid_config_use_app_id = enabled;
        self
    }

    /// Accept tokens from these tenants as well. For multi-tenant
    /// configurations this turns "any tenant" into an allow-list.
    pub fn with_accepted_tenants(mut self, tenants: Vec<String>) -> Self {
        match &mut self.tenancy {
            Tenancy::Single {
                additional_tenants, ..
            } => *additional_tenants = tenants,
            Tenancy::Multi { allowed_tenants } => *allowed_tenants = tenants,
        }
        self
    }

    pub fn with_additional_audiences(mut self, audiences: Vec<String>) -> Self {
        self.additional_audiences = audiences;
        self
    }

    pub fn with_required_scopes(mut self, scopes: Vec<String>) -> Self {
        self.required_scopes = scopes;
        self
    }

    pub fn with_required_roles(mut self, roles: Vec<String>) -> Self {
        self.required_roles = roles;
        self
    }

    pub fn with_allow_guest_users(mut self, allow: bool) -> Self {
        self.allow_guest_users = allow;
        self
    }

    pub fn with_guest_signals(mut self, signals: Vec<GuestSignal>) -> Self {
        self.guest_signals = signals;
        self
    }

    pub fn with_signing_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.signing_algorithm = algorithm;
        self
    }

    pub fn with_metadata_ttl(mut self, ttl: Duration) -> Self {
        self.metadata_ttl = ttl;
        self
    }

    pub fn with_jwks_ttl(mut self, ttl: Duration) -> Self {
        self.jwks_ttl = ttl;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Check the invariants the engine relies on.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule as a `ConfigError`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_client_id.trim().is_empty() {
            return Err(ConfigError::InvalidClientId(
                "client id must not be empty".to_string(),
            ));
        }

        if let Tenancy::Single { tenant_id, .. } = &self.tenancy {
            if tenant_id.trim().is_empty() {
                return Err(ConfigError::InvalidTenancy(
                    "single-tenant configuration requires a tenant id".to_string(),
                ));
            }
        }

        let authority = reqwest::Url::parse(&self.authority)
            .map_err(|e| ConfigError::InvalidAuthority(format!("'{}': {}", self.authority, e)))?;
        if !matches!(authority.scheme(), "https" | "http") {
            return Err(ConfigError::InvalidAuthority(format!(
                "'{}' must be an http(s) URL",
                self.authority
            )));
        }

        if !is_rsa_algorithm(self.signing_algorithm) {
            return Err(ConfigError::InvalidSigningAlgorithm(format!(
                "{:?} is not an RSA signing algorithm",
                self.signing_algorithm
            )));
        }

        for (name, value) in [
            ("metadata TTL", self.metadata_ttl),
            ("JWKS TTL", self.jwks_ttl),
            ("fetch timeout", self.fetch_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidDuration(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if self.clock_skew > MAX_CLOCK_SKEW {
            return Err(ConfigError::InvalidJwtClockSkew(format!(
                "clock skew must not exceed {} seconds, got {}",
                MAX_CLOCK_SKEW.as_secs(),
                self.clock_skew.as_secs()
            )));
        }

        Ok(())
    }

    /// The tenant used in the discovery URL.
    pub fn home_tenant(&self) -> Option<&str> {
        match &self.tenancy {
            Tenancy::Single { tenant_id, .. } => Some(tenant_id),
            Tenancy::Multi { .. } => None,
        }
    }

    /// URL of the provider's OpenID discovery document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidAuthority` if the authority and tenant do
    /// not form a valid URL.
    pub fn discovery_url(&self) -> Result<reqwest::Url, ConfigError> {
        let base = self.authority.trim_end_matches('/');
        let tenant = self.home_tenant().unwrap_or(MULTI_TENANT_SEGMENT);
        let raw = match self.token_version {
            TokenVersion::V1 => format!("{base}/{tenant}/.well-known/openid-configuration"),
            TokenVersion::V2 => format!("{base}/{tenant}/v2.0/.well-known/openid-configuration"),
        };

        let mut url = reqwest::Url::parse(&raw)
            .map_err(|e| ConfigError::InvalidAuthority(format!("'{raw}': {e}")))?;
        if self.openid_config_use_app_id {
            url.query_pairs_mut()
                .append_pair("appid", &self.app_client_id);
        }
        Ok(url)
    }

    /// Audiences a token may carry in `aud`.
    pub fn accepted_audiences(&self) -> Vec<String> {
        let derived = match self.token_version {
            TokenVersion::V1 => format!("api://{}", self.app_client_id),
            TokenVersion::V2 => self.app_client_id.clone(),
        };
        std::iter::once(derived)
            .chain(self.additional_audiences.iter().cloned())
            .collect()
    }

    /// Whether a token issued by tenant `tid` may pass.
    pub fn accepts_tenant(&self, tid: &str) -> bool {
        match &self.tenancy {
            Tenancy::Single {
                tenant_id,
                additional_tenants,
            } => tenant_id == tid || additional_tenants.iter().any(|t| t == tid),
            Tenancy::Multi { allowed_tenants } => {
                allowed_tenants.is_empty() || allowed_tenants.iter().any(|t| t == tid)
            }
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let app_client_id = vars
            .get("AAD_APP_CLIENT_ID")
            .ok_or_else(|| ConfigError::MissingEnvVar("AAD_APP_CLIENT_ID".to_string()))?
            .clone();

        let multi_tenant = parse_flag(vars, "AAD_MULTI_TENANT")?.unwrap_or(false);

        let mut config = if multi_tenant {
            Self::multi_tenant(app_client_id)
        } else {
            let tenant_id = vars
                .get("AAD_TENANT_ID")
                .ok_or_else(|| ConfigError::MissingEnvVar("AAD_TENANT_ID".to_string()))?
                .clone();
            Self::single_tenant(app_client_id, tenant_id)
        };

        if let Some(tenants) = vars.get("AAD_ACCEPTED_TENANTS") {
            config = config.with_accepted_tenants(parse_list(tenants));
        }

        if let Some(value) = vars.get("AAD_TOKEN_VERSION") {
            config.token_version = match value.trim() {
                "1" | "1.0" | "v1" => TokenVersion::V1,
                "2" | "2.0" | "v2" => TokenVersion::V2,
                other => {
                    return Err(ConfigError::InvalidTokenVersion(format!(
                        "AAD_TOKEN_VERSION must be 1 or 2, got '{other}'"
                    )))
                }
            };
        }

        if let Some(authority) = vars.get("AAD_AUTHORITY") {
            config.authority = authority.clone();
        }

        if let Some(enabled) = parse_flag(vars, "AAD_OPENID_CONFIG_USE_APP_ID")? {
            config.openid_config_use_app_id = enabled;
        }

        if let Some(audiences) = vars.get("AAD_ADDITIONAL_AUDIENCES") {
            config.additional_audiences = parse_list(audiences);
        }

        if let Some(scopes) = vars.get("AAD_REQUIRED_SCOPES") {
            config.required_scopes = parse_list(scopes);
        }

        if let Some(roles) = vars.get("AAD_REQUIRED_ROLES") {
            config.required_roles = parse_list(roles);
        }

        if let Some(allow) = parse_flag(vars, "AAD_ALLOW_GUEST_USERS")? {
            config.allow_guest_users = allow;
        }

        if let Some(signals) = vars.get("AAD_GUEST_SIGNALS") {
            config.guest_signals = parse_list(signals)
                .iter()
                .map(|s| GuestSignal::from_str(s).map_err(ConfigError::InvalidGuestSignal))
                .collect::<Result<_, _>>()?;
        }

        if let Some(value) = vars.get("AAD_SIGNING_ALGORITHM") {
            config.signing_algorithm = Algorithm::from_str(value.trim()).map_err(|e| {
                ConfigError::InvalidSigningAlgorithm(format!(
                    "AAD_SIGNING_ALGORITHM '{value}' is not recognised: {e}"
                ))
            })?;
        }

        if let Some(ttl) = parse_seconds(vars, "AAD_METADATA_TTL_SECONDS")? {
            config.metadata_ttl = ttl;
        }

        if let Some(ttl) = parse_seconds(vars, "AAD_JWKS_TTL_SECONDS")? {
            config.jwks_ttl = ttl;
        }

        if let Some(timeout) = parse_seconds(vars, "AAD_FETCH_TIMEOUT_SECONDS")? {
            config.fetch_timeout = timeout;
        }

        // Parse JWT clock skew tolerance; zero is allowed here, unlike the TTLs
        if let Some(value_str) = vars.get("AAD_CLOCK_SKEW_SECONDS") {
            let value: u64 = value_str.trim().parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "AAD_CLOCK_SKEW_SECONDS must be a non-negative integer, got '{}': {}",
                    value_str, e
                ))
            })?;
            config.clock_skew = Duration::from_secs(value);
        }

        config.validate()?;
        Ok(config)
    }
}

/// RSA family only: the provider publishes RSA keys, and accepting anything
/// else would open the door to algorithm confusion.
fn is_rsa_algorithm(algorithm: Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512
    )
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_flag(vars: &HashMap<String, String>, name: &str) -> Result<Option<bool>, ConfigError> {
    match vars.get(name).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(None),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(Some(true)),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(Some(false)),
        Some(_) => Err(ConfigError::InvalidFlag(name.to_string())),
    }
}

fn parse_seconds(
    vars: &HashMap<String, String>,
    name: &str,
) -> Result<Option<Duration>, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(None);
    };

    let value: u64 = value_str.trim().parse().map_err(|e| {
        ConfigError::InvalidDuration(format!(
            "{} must be a valid positive integer, got '{}': {}",
            name, value_str, e
        ))
    })?;

    if value == 0 {
        return Err(ConfigError::InvalidDuration(format!(
            "{name} must be greater than 0"
        )));
    }

    Ok(Some(Duration::from_secs(value)))
}
