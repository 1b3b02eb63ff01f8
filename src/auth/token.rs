use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::error::AuthError;

/// OAuth credential held by the registry and persisted by a token store.
///
/// A `Token` is never mutated in place once published; refreshes and
/// reauthorization cycles build a new value and swap it in whole.
///
/// # Example
/// ```no_run
/// use scopeauth::auth::Token;
///
/// let token = Token {
///     access_token: "access".to_string(),
///     refresh_token: Some("refresh".to_string()),
///     scopes: vec!["chat:read".to_string()],
///     token_type: "bearer".to_string(),
///     expires_at: None,
///     last_refresh: None,
/// };
/// assert!(token.grants("chat:read"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_refresh: Option<DateTime<Utc>>,
}

impl Token {
    /// Whether the provider granted `scope` to this token.
    pub fn grants(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// Granted scopes as an ordered set.
    pub fn scope_set(&self) -> BTreeSet<String> {
        self.scopes.iter().cloned().collect()
    }

    /// Expiry hint has passed. Tokens without a hint are never considered expired
    /// here; `/validate` is the authority for those.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Token endpoint success body.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenPayload {
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_in: Option<i64>,
}

impl TokenPayload {
    pub(crate) fn into_token(self) -> Result<Token, AuthError> {
        let now = Utc::now();
        let expires_at = self
            .expires_in
            .map(|secs| expiry_after(now, secs))
            .transpose()?;
        Ok(Token {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            scopes: self.scope,
            token_type: self.token_type,
            expires_at,
            last_refresh: Some(now),
        })
    }
}

/// `start + secs`, rejecting provider lifetimes chrono cannot represent.
pub(crate) fn expiry_after(start: DateTime<Utc>, secs: i64) -> Result<DateTime<Utc>, AuthError> {
    Duration::try_seconds(secs)
        .and_then(|ttl| start.checked_add_signed(ttl))
        .ok_or_else(|| AuthError::InvalidResponse(format!("expires_in out of range: {secs}")))
}

/// Result of `GET /validate` for a live token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenValidation {
    pub client_id: String,
    pub login: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub user_id: Option<String>,
    #[serde(alias = "expires_at")]
    pub expires_in: Option<i64>,
}
