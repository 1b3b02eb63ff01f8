use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::device_code::{DeviceCodePoll, DeviceCodeSession, PollSchedule};
use super::error::AuthError;
use super::token::{expiry_after, Token, TokenPayload, TokenValidation};
use crate::config::AuthConfig;

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// The two device-flow steps a reauthorization cycle needs.
///
/// [`DeviceAuthClient`] is the network implementation; the registry only
/// depends on this seam.
#[async_trait]
pub trait DeviceAuthFlow: Send + Sync {
    async fn initiate_session(&self, scopes: &[String]) -> Result<DeviceCodeSession, AuthError>;

    async fn poll_until_resolved(
        &self,
        session: &DeviceCodeSession,
        cancel: &CancellationToken,
    ) -> Result<Token, AuthError>;
}

/// Device Authorization Grant client.
///
/// The HTTP client is injected so one connection pool can be shared across
/// the process.
///
/// # Example
/// ```no_run
/// use scopeauth::auth::DeviceAuthClient;
/// use scopeauth::config::AuthConfig;
///
/// # async fn run() -> Result<(), scopeauth::auth::AuthError> {
/// let config = AuthConfig::builder().client_id("my-client").build();
/// let client = DeviceAuthClient::new(reqwest::Client::new(), &config);
/// let token = client
///     .authenticate(&["chat:read".to_string()], None, |session| {
///         println!("Visit {} and enter {}", session.verification_url, session.user_code);
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DeviceAuthClient {
    http: reqwest::Client,
    client_id: Option<String>,
    device_url: String,
    token_url: String,
    validate_url: String,
    slow_down_step: Duration,
    min_poll_interval: Duration,
    request_timeout: Duration,
}

impl DeviceAuthClient {
    pub fn new(http: reqwest::Client, config: &AuthConfig) -> Self {
        Self {
            http,
            client_id: config.client_id.clone(),
            device_url: config.device_url(),
            token_url: config.token_url(),
            validate_url: config.validate_url(),
            slow_down_step: config.slow_down_step,
            min_poll_interval: config.min_poll_interval,
            request_timeout: config.request_timeout,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_slow_down_step(mut self, step: Duration) -> Self {
        self.slow_down_step = step;
        self
    }

    fn resolve_client_id<'a>(&'a self, client_id: Option<&'a str>) -> Result<&'a str, AuthError> {
        client_id
            .or(self.client_id.as_deref())
            .ok_or_else(|| AuthError::Configuration("client id not set".to_string()))
    }

    /// Request a device code covering `scopes`.
    pub async fn initiate_session(
        &self,
        scopes: &[String],
        client_id: Option<&str>,
    ) -> Result<DeviceCodeSession, AuthError> {
        if scopes.is_empty() {
            return Err(AuthError::InvalidState(
                "device code requested with no scopes".to_string(),
            ));
        }
        let client_id = self.resolve_client_id(client_id)?;
        let joined = scopes.join(" ");
        let resp = self
            .http
            .post(&self.device_url)
            .header("Accept", "application/json")
            .timeout(self.request_timeout)
            .form(&[("client_id", client_id), ("scopes", joined.as_str())])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(provider_error(resp).await);
        }
        let payload: DeviceCodePayload = resp.json().await?;
        let issued_at = Utc::now();
        let expires_at = i64::try_from(payload.expires_in)
            .map_err(|_| {
                AuthError::InvalidResponse(format!("expires_in out of range: {}", payload.expires_in))
            })
            .and_then(|secs| expiry_after(issued_at, secs))?;
        let interval = Duration::from_secs(payload.interval).max(self.min_poll_interval);
        tracing::debug!(
            scope_count = scopes.len(),
            expires_in = payload.expires_in,
            interval = payload.interval,
            "Device code issued"
        );
        Ok(DeviceCodeSession {
            client_id: client_id.to_string(),
            device_code: payload.device_code,
            user_code: payload.user_code,
            verification_url: payload.verification_uri,
            scopes: scopes.to_vec(),
            issued_at,
            expires_at,
            interval,
        })
    }

    /// One token-endpoint call with the session's device code.
    ///
    /// `authorization_pending` and `slow_down` are returned as poll states;
    /// every other provider message is an error.
    pub async fn poll_once(&self, session: &DeviceCodeSession) -> Result<DeviceCodePoll, AuthError> {
        let joined = session.scopes.join(" ");
        let resp = self
            .http
            .post(&self.token_url)
            .header("Accept", "application/json")
            .timeout(self.request_timeout)
            .form(&[
                ("client_id", session.client_id.as_str()),
                ("device_code", session.device_code.as_str()),
                ("grant_type", DEVICE_CODE_GRANT),
                ("scopes", joined.as_str()),
            ])
            .send()
            .await?;
        if resp.status().is_success() {
            let payload: TokenPayload = resp.json().await?;
            return Ok(DeviceCodePoll::Authorized {
                token: payload.into_token()?,
            });
        }
        match provider_error(resp).await {
            AuthError::Provider { message, .. } if message == "authorization_pending" => {
                Ok(DeviceCodePoll::Pending)
            }
            AuthError::Provider { message, .. } if message == "slow_down" => {
                Ok(DeviceCodePoll::SlowDown)
            }
            AuthError::Provider { message, .. } if message == "access_denied" => {
                Err(AuthError::AccessDenied)
            }
            AuthError::Provider { message, .. } if message == "expired_token" => {
                Err(AuthError::ExpiredOrInvalidGrant)
            }
            other => Err(other),
        }
    }

    /// Poll until the provider issues a token, rejects the session, the
    /// device code expires, or `cancel` fires.
    ///
    /// Every iteration sleeps for the current interval, never less than the
    /// configured minimum, before calling the token endpoint. The last sleep
    /// is clamped to the session's expiry.
    pub async fn poll_until_resolved(
        &self,
        session: &DeviceCodeSession,
        cancel: &CancellationToken,
    ) -> Result<Token, AuthError> {
        let deadline = Instant::now() + session.remaining();
        let mut schedule = PollSchedule::new(
            session.interval.max(self.min_poll_interval),
            self.slow_down_step,
        );
        let mut attempts: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(AuthError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(AuthError::TimedOut);
            }
            let wait = schedule.interval().min(deadline - now);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AuthError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
            if Instant::now() >= deadline {
                tracing::warn!(attempts, "Device code expired while polling");
                return Err(AuthError::TimedOut);
            }

            attempts += 1;
            let poll = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AuthError::Cancelled),
                result = self.poll_once(session) => result?,
            };
            match poll {
                DeviceCodePoll::Authorized { token } => {
                    tracing::info!(attempts, "Device code authorized");
                    return Ok(token);
                }
                DeviceCodePoll::Pending => {
                    tracing::debug!(attempts, "Authorization pending");
                }
                DeviceCodePoll::SlowDown => {
                    let interval = schedule.slow_down();
                    tracing::warn!(
                        attempts,
                        interval_ms = interval.as_millis() as u64,
                        "Provider asked to slow down"
                    );
                }
            }
        }
    }

    /// Initiate a session, hand it to `on_session` for display, then poll it.
    pub async fn authenticate(
        &self,
        scopes: &[String],
        client_id: Option<&str>,
        on_session: impl FnOnce(&DeviceCodeSession) + Send,
    ) -> Result<Token, AuthError> {
        let session = self.initiate_session(scopes, client_id).await?;
        on_session(&session);
        self.poll_until_resolved(&session, &CancellationToken::new())
            .await
    }

    /// Check a token with the provider. A 401 means it is invalid or expired.
    pub async fn validate(&self, access_token: &str) -> Result<TokenValidation, AuthError> {
        let resp = self
            .http
            .get(&self.validate_url)
            .header("Accept", "application/json")
            .header("Authorization", format!("OAuth {access_token}"))
            .timeout(self.request_timeout)
            .send()
            .await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(AuthError::ExpiredOrInvalidGrant);
        }
        if !resp.status().is_success() {
            return Err(provider_error(resp).await);
        }
        Ok(resp.json().await?)
    }

    /// Exchange the token's refresh token for a new token.
    ///
    /// The old refresh token is kept when the provider does not rotate it.
    pub async fn refresh(&self, token: &Token) -> Result<Token, AuthError> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::InvalidState("token has no refresh token".to_string()))?;
        let client_id = self.resolve_client_id(None)?;
        let resp = self
            .http
            .post(&self.token_url)
            .header("Accept", "application/json")
            .timeout(self.request_timeout)
            .form(&[
                ("client_id", client_id),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(AuthError::ExpiredOrInvalidGrant);
        }
        if !resp.status().is_success() {
            return Err(provider_error(resp).await);
        }
        let payload: TokenPayload = resp.json().await?;
        let mut refreshed = payload.into_token()?;
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = token.refresh_token.clone();
        }
        if refreshed.scopes.is_empty() {
            refreshed.scopes = token.scopes.clone();
        }
        Ok(refreshed)
    }
}

#[async_trait]
impl DeviceAuthFlow for DeviceAuthClient {
    async fn initiate_session(&self, scopes: &[String]) -> Result<DeviceCodeSession, AuthError> {
        DeviceAuthClient::initiate_session(self, scopes, None).await
    }

    async fn poll_until_resolved(
        &self,
        session: &DeviceCodeSession,
        cancel: &CancellationToken,
    ) -> Result<Token, AuthError> {
        DeviceAuthClient::poll_until_resolved(self, session, cancel).await
    }
}

#[derive(Debug, Deserialize)]
struct DeviceCodePayload {
    device_code: String,
    user_code: String,
    verification_uri: String,
    expires_in: u64,
    #[serde(default = "default_poll_interval")]
    interval: u64,
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

#[derive(Debug, Default, Deserialize)]
struct ProviderErrorBody {
    status: Option<u16>,
    message: Option<String>,
    error: Option<String>,
}

/// Turn a non-success response into [`AuthError::Provider`], using the
/// provider's message when the body parses and the raw status otherwise.
async fn provider_error(resp: Response) -> AuthError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let parsed: ProviderErrorBody = serde_json::from_str(&body).unwrap_or_default();
    let message = parsed
        .message
        .or(parsed.error)
        .unwrap_or_else(|| status.to_string());
    AuthError::Provider {
        status: parsed.status.unwrap_or(status.as_u16()),
        message,
    }
}
