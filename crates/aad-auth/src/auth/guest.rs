//! Guest classification and policy.
//!
//! A principal is a guest when any enabled [`GuestSignal`] fires on its
//! validated claims. Azure AD has marked guests differently across token
//! versions, so the signal set is configuration rather than a fixed rule.
//! Classification is a pure function of claims and policy; it runs only
//! after the token was fully validated.

use crate::auth::claims::ValidatedClaims;
use crate::config::{AuthConfig, Tenancy};
use crate::errors::AuthError;
use common::secret::SecretString;
use std::fmt;
use std::str::FromStr;

/// Marker in the UPN of B2B guest accounts.
const EXTERNAL_UPN_MARKER: &str = "#EXT#";

/// A claim pattern that marks a guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuestSignal {
    /// `acct` is 1 (guest account type).
    AccountType,
    /// `idp` is present and differs from `iss`: another identity provider
    /// authenticated the subject.
    IdentityProvider,
    /// `upn` or `unique_name` carries the `#EXT#` marker.
    ExternalUpn,
    /// Single-tenant deployments only: `tid` is not the home tenant.
    ForeignTenant,
}

impl GuestSignal {
    /// Signals enabled when none are configured.
    pub fn defaults() -> Vec<GuestSignal> {
        vec![GuestSignal::AccountType, GuestSignal::IdentityProvider]
    }

    fn fires(self, claims: &ValidatedClaims, home_tenant: Option<&str>) -> bool {
        match self {
            GuestSignal::AccountType => claims.acct == Some(1),
            GuestSignal::IdentityProvider => claims
                .idp
                .as_deref()
                .is_some_and(|idp| !idp.is_empty() && idp != claims.iss),
            GuestSignal::ExternalUpn => [&claims.upn, &claims.unique_name]
                .into_iter()
                .flatten()
                .any(|name| name.contains(EXTERNAL_UPN_MARKER)),
            GuestSignal::ForeignTenant => home_tenant.is_some_and(|home| home != claims.tid),
        }
    }
}

impl FromStr for GuestSignal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "acct" | "account_type" => Ok(GuestSignal::AccountType),
            "idp" | "identity_provider" => Ok(GuestSignal::IdentityProvider),
            "upn" | "external_upn" => Ok(GuestSignal::ExternalUpn),
            "tenant" | "foreign_tenant" => Ok(GuestSignal::ForeignTenant),
            other => Err(format!(
                "unknown guest signal '{other}' (expected acct, idp, upn or tenant)"
            )),
        }
    }
}

/// Authenticated caller returned by the gate.
#[derive(Clone)]
pub struct Principal {
    pub claims: ValidatedClaims,
    pub is_guest: bool,
    access_token: SecretString,
}

impl Principal {
    /// The bearer token this principal was built from, for on-behalf-of
    /// exchanges. Callers must `expose_secret()` explicitly.
    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("claims", &self.claims)
            .field("is_guest", &self.is_guest)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// Guest policy for one gate configuration.
#[derive(Debug, Clone)]
pub struct GuestPolicy {
    allow_guest_users: bool,
    signals: Vec<GuestSignal>,
    home_tenant: Option<String>,
}

impl GuestPolicy {
    pub fn new(allow_guest_users: bool, signals: Vec<GuestSignal>, tenancy: &Tenancy) -> Self {
        let home_tenant = match tenancy {
            Tenancy::Single { tenant_id, .. } => Some(tenant_id.clone()),
            Tenancy::Multi { .. } => None,
        };
        Self {
            allow_guest_users,
            signals,
            home_tenant,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            config.allow_guest_users,
            config.guest_signals.clone(),
            &config.tenancy,
        )
    }

    /// Whether `claims` belong to a guest.
    pub fn is_guest(&self, claims: &ValidatedClaims) -> bool {
        self.signals
            .iter()
            .any(|signal| signal.fires(claims, self.home_tenant.as_deref()))
    }

    /// Turn validated claims into a principal, enforcing the guest rule.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::GuestNotAllowed` for a guest when guests are
    /// disabled.
    pub fn classify(
        &self,
        claims: ValidatedClaims,
        access_token: SecretString,
    ) -> Result<Principal, AuthError> {
        let is_guest = self.is_guest(&claims);

        if is_guest && !self.allow_guest_users {
            tracing::debug!(target: "aad.guest", tid = %claims.tid, "Guest principal rejected");
            return Err(AuthError::GuestNotAllowed);
        }

        Ok(Principal {
            claims,
            is_guest,
            access_token,
        })
    }
}
