//! Validated Azure AD claims.
//!
//! Built only after the signature and time bounds were checked. Identity
//! fields (`sub`, `oid`, `upn`, `unique_name`, `preferred_username`, `name`)
//! are redacted in Debug output to prevent exposure in logs.

use common::jwt::TimeClaims;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

const REDACTED: &str = "[REDACTED]";

/// Signature-verified claim set.
///
/// Standard claims are typed; `raw` keeps every claim the token carried,
/// including provider extensions that have no typed field.
#[derive(Clone, PartialEq, Serialize)]
pub struct ValidatedClaims {
    pub iss: String,

    /// Audiences. A single-string `aud` becomes a one-element list.
    pub aud: Vec<String>,

    /// Subject - redacted in Debug output.
    pub sub: String,

    /// Tenant that issued the token.
    pub tid: String,

    pub exp: i64,
    pub nbf: i64,
    pub iat: i64,

    /// Delegated scopes (`scp`, space-separated in the token).
    pub scp: Vec<String>,

    /// Application roles.
    pub roles: Vec<String>,

    pub name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub unique_name: Option<String>,
    pub upn: Option<String>,
    pub preferred_username: Option<String>,
    pub oid: Option<String>,
    pub appid: Option<String>,
    pub azp: Option<String>,

    /// Identity provider that authenticated the subject, when it is not the
    /// issuing tenant.
    pub idp: Option<String>,

    /// Account type: 0 for members, 1 for guests.
    pub acct: Option<i64>,

    /// Token version ("1.0" or "2.0").
    pub ver: Option<String>,

    /// Every claim as received.
    pub raw: Map<String, Value>,
}

impl fmt::Debug for ValidatedClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedClaims")
            .field("iss", &self.iss)
            .field("aud", &self.aud)
            .field("sub", &REDACTED)
            .field("tid", &self.tid)
            .field("exp", &self.exp)
            .field("nbf", &self.nbf)
            .field("iat", &self.iat)
            .field("scp", &self.scp)
            .field("roles", &self.roles)
            .field("name", &self.name.as_ref().map(|_| REDACTED))
            .field("unique_name", &self.unique_name.as_ref().map(|_| REDACTED))
            .field("upn", &self.upn.as_ref().map(|_| REDACTED))
            .field(
                "preferred_username",
                &self.preferred_username.as_ref().map(|_| REDACTED),
            )
            .field("oid", &self.oid.as_ref().map(|_| REDACTED))
            .field("appid", &self.appid)
            .field("idp", &self.idp)
            .field("acct", &self.acct)
            .field("ver", &self.ver)
            .finish_non_exhaustive()
    }
}

impl ValidatedClaims {
    /// Build the typed view of a verified claim map.
    ///
    /// # Errors
    ///
    /// Returns the name of the first required claim (`iss`, `sub`, `tid`,
    /// `aud`) that is missing or has the wrong shape.
    pub(crate) fn from_verified(
        raw: Map<String, Value>,
        times: TimeClaims,
    ) -> Result<Self, &'static str> {
        let iss = required_string(&raw, "iss")?;
        let sub = required_string(&raw, "sub")?;
        let tid = required_string(&raw, "tid")?;
        let aud = audiences(&raw).ok_or("aud")?;

        let scp = match raw.get("scp") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(s)) => s.split_whitespace().map(ToString::to_string).collect(),
            Some(_) => return Err("scp"),
        };

        let roles = match raw.get("roles") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| v.as_str().map(ToString::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or("roles")?,
            Some(_) => return Err("roles"),
        };

        Ok(Self {
            iss,
            aud,
            sub,
            tid,
            exp: times.exp,
            nbf: times.nbf,
            iat: times.iat,
            scp,
            roles,
            name: optional_string(&raw, "name"),
            given_name: optional_string(&raw, "given_name"),
            family_name: optional_string(&raw, "family_name"),
            unique_name: optional_string(&raw, "unique_name"),
            upn: optional_string(&raw, "upn"),
            preferred_username: optional_string(&raw, "preferred_username"),
            oid: optional_string(&raw, "oid"),
            appid: optional_string(&raw, "appid"),
            azp: optional_string(&raw, "azp"),
            idp: optional_string(&raw, "idp"),
            acct: raw.get("acct").and_then(Value::as_i64),
            ver: optional_string(&raw, "ver"),
            raw,
        })
    }

    /// Check if the token carries a delegated scope.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scp.iter().any(|s| s == scope)
    }

    /// Check if the token carries an application role.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Look up any claim by name.
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.raw.get(name)
    }
}

fn required_string(raw: &Map<String, Value>, name: &'static str) -> Result<String, &'static str> {
    raw.get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or(name)
}

fn optional_string(raw: &Map<String, Value>, name: &str) -> Option<String> {
    raw.get(name).and_then(Value::as_str).map(ToString::to_string)
}

fn audiences(raw: &Map<String, Value>) -> Option<Vec<String>> {
    match raw.get("aud")? {
        Value::String(s) if !s.is_empty() => Some(vec![s.clone()]),
        Value::Array(items) if !items.is_empty() => items
            .iter()
            .map(|v| v.as_str().map(ToString::to_string))
            .collect(),
        _ => None,
    }
}
