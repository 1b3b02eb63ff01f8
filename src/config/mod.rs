//! Configuration (layered: code > env > defaults).

use std::path::PathBuf;
use std::time::Duration;

use bon::Builder;

use crate::auth::device_code::DEFAULT_SLOW_DOWN_STEP;
use crate::auth::AuthError;

pub const DEFAULT_AUTH_BASE_URL: &str = "https://id.twitch.tv/oauth2";

/// Quiet period that collapses a burst of scope registrations into one cycle.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(5);

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Floor for the poll interval when a provider reports 0 or a tiny value.
pub const DEFAULT_MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

const CLIENT_ID_ENV: &str = "SCOPEAUTH_CLIENT_ID";
const AUTH_BASE_URL_ENV: &str = "SCOPEAUTH_AUTH_BASE_URL";
const DEBOUNCE_MS_ENV: &str = "SCOPEAUTH_DEBOUNCE_MS";
const REQUEST_TIMEOUT_ENV: &str = "SCOPEAUTH_REQUEST_TIMEOUT_SECS";
const TOKEN_PATH_ENV: &str = "SCOPEAUTH_TOKEN_PATH";

/// Settings for the device-code client and the scope registry.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use scopeauth::config::AuthConfig;
///
/// let config = AuthConfig::builder()
///     .client_id("my-client")
///     .debounce(Duration::from_millis(250))
///     .build();
/// assert_eq!(config.token_url(), "https://id.twitch.tv/oauth2/token");
/// ```
#[derive(Debug, Clone, Builder)]
pub struct AuthConfig {
    #[builder(into)]
    pub client_id: Option<String>,
    #[builder(into, default = DEFAULT_AUTH_BASE_URL.to_string())]
    pub auth_base_url: String,
    #[builder(default = DEFAULT_DEBOUNCE)]
    pub debounce: Duration,
    #[builder(default = DEFAULT_SLOW_DOWN_STEP)]
    pub slow_down_step: Duration,
    #[builder(default = DEFAULT_MIN_POLL_INTERVAL)]
    pub min_poll_interval: Duration,
    #[builder(default = DEFAULT_REQUEST_TIMEOUT)]
    pub request_timeout: Duration,
    #[builder(into, default = default_token_path())]
    pub token_path: PathBuf,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl AuthConfig {
    /// Load from environment variables, reading `.env` if present.
    pub fn from_env() -> Result<Self, AuthError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay values from `lookup` onto this config.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), AuthError> {
        if let Some(client_id) = lookup(CLIENT_ID_ENV).filter(|v| !v.trim().is_empty()) {
            self.client_id = Some(client_id.trim().to_string());
        }
        if let Some(url) = lookup(AUTH_BASE_URL_ENV) {
            self.auth_base_url = url;
        }
        if let Some(raw) = lookup(DEBOUNCE_MS_ENV) {
            self.debounce = Duration::from_millis(parse_number(DEBOUNCE_MS_ENV, &raw)?);
        }
        if let Some(raw) = lookup(REQUEST_TIMEOUT_ENV) {
            self.request_timeout = Duration::from_secs(parse_number(REQUEST_TIMEOUT_ENV, &raw)?);
        }
        if let Some(path) = lookup(TOKEN_PATH_ENV) {
            self.token_path = PathBuf::from(path);
        }
        Ok(())
    }

    pub fn require_client_id(&self) -> Result<&str, AuthError> {
        self.client_id.as_deref().ok_or_else(|| {
            AuthError::Configuration(format!("client id not set (use {CLIENT_ID_ENV})"))
        })
    }

    pub fn device_url(&self) -> String {
        self.endpoint("device")
    }

    pub fn token_url(&self) -> String {
        self.endpoint("token")
    }

    pub fn validate_url(&self) -> String {
        self.endpoint("validate")
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{name}", self.auth_base_url.trim_end_matches('/'))
    }
}

fn parse_number(key: &str, raw: &str) -> Result<u64, AuthError> {
    raw.trim()
        .parse()
        .map_err(|_| AuthError::Configuration(format!("{key} must be a non-negative integer, got {raw:?}")))
}

fn default_token_path() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".scopeauth"))
        .unwrap_or_else(|| PathBuf::from(".scopeauth"))
        .join("token.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_provider_and_timing() {
        let config = AuthConfig::default();
        assert_eq!(config.client_id, None);
        assert_eq!(config.debounce, Duration::from_secs(5));
        assert_eq!(config.slow_down_step, Duration::from_secs(5));
        assert_eq!(config.min_poll_interval, Duration::from_secs(1));
        assert_eq!(config.device_url(), "https://id.twitch.tv/oauth2/device");
        assert_eq!(config.validate_url(), "https://id.twitch.tv/oauth2/validate");
        assert!(config.token_path.ends_with("token.toml"));
    }

    #[test]
    fn env_overrides_defaults() {
        let mut config = AuthConfig::default();
        config
            .apply_env(lookup(&[
                ("SCOPEAUTH_CLIENT_ID", " abc "),
                ("SCOPEAUTH_AUTH_BASE_URL", "http://localhost:9000/oauth2/"),
                ("SCOPEAUTH_DEBOUNCE_MS", "250"),
                ("SCOPEAUTH_TOKEN_PATH", "/tmp/token.toml"),
            ]))
            .unwrap();
        assert_eq!(config.client_id.as_deref(), Some("abc"));
        assert_eq!(config.debounce, Duration::from_millis(250));
        assert_eq!(config.token_url(), "http://localhost:9000/oauth2/token");
        assert_eq!(config.token_path, PathBuf::from("/tmp/token.toml"));
    }

    #[test]
    fn explicit_builder_values_survive_empty_env() {
        let mut config = AuthConfig::builder().client_id("explicit").build();
        config.apply_env(lookup(&[("SCOPEAUTH_CLIENT_ID", "  ")])).unwrap();
        assert_eq!(config.require_client_id().unwrap(), "explicit");
    }

    #[test]
    fn malformed_number_is_a_configuration_error() {
        let mut config = AuthConfig::default();
        let err = config
            .apply_env(lookup(&[("SCOPEAUTH_DEBOUNCE_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, AuthError::Configuration(msg) if msg.contains("SCOPEAUTH_DEBOUNCE_MS")));
    }

    #[test]
    fn missing_client_id_is_reported() {
        let config = AuthConfig::default();
        assert!(matches!(
            config.require_client_id(),
            Err(AuthError::Configuration(_))
        ));
    }
}
