use std::sync::Arc;

use chrono::Utc;

use super::client::DeviceAuthClient;
use super::error::AuthError;
use super::store::TokenStore;
use super::token::{expiry_after, Token};
use crate::scope::ScopeRegistry;

/// Sequential token upkeep: restore, validate, refresh, persist.
///
/// All decisions about presenting results belong to the caller.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use scopeauth::auth::{DeviceAuthClient, FileTokenStore, TokenService};
/// use scopeauth::config::AuthConfig;
/// use scopeauth::scope::ScopeRegistry;
///
/// # async fn run() -> Result<(), scopeauth::auth::AuthError> {
/// let config = AuthConfig::from_env()?;
/// let client = DeviceAuthClient::new(reqwest::Client::new(), &config);
/// let service = TokenService::new(client.clone(), Arc::new(FileTokenStore::new(&config.token_path)));
/// let registry = ScopeRegistry::from_config(Arc::new(client), &config);
/// service.restore(&registry).await?;
/// # Ok(())
/// # }
/// ```
pub struct TokenService {
    client: DeviceAuthClient,
    store: Arc<dyn TokenStore>,
}

impl TokenService {
    pub fn new(client: DeviceAuthClient, store: Arc<dyn TokenStore>) -> Self {
        Self { client, store }
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Load the persisted token, make sure it is still usable and install it
    /// in `registry`.
    ///
    /// Returns `None` when nothing is stored or the stored token can no longer
    /// be refreshed; in the latter case the stale file is removed so the next
    /// scope registration starts a fresh device-code cycle.
    pub async fn restore(&self, registry: &ScopeRegistry) -> Result<Option<Token>, AuthError> {
        let Some(stored) = self.store.load()? else {
            tracing::debug!("No persisted token");
            return Ok(None);
        };
        match self.ensure_valid(stored).await {
            Ok(token) => {
                registry.set_token(token.clone());
                Ok(Some(token))
            }
            Err(err @ (AuthError::ExpiredOrInvalidGrant | AuthError::Provider { .. } | AuthError::InvalidState(_))) => {
                tracing::warn!(error = %err, "Persisted token is unusable; discarding");
                self.store.clear()?;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Validate `token`, refreshing and persisting it when the provider
    /// reports it invalid or expired.
    pub async fn ensure_valid(&self, token: Token) -> Result<Token, AuthError> {
        match self.client.validate(&token.access_token).await {
            Ok(validation) => {
                let mut checked = token;
                if !validation.scopes.is_empty() {
                    checked.scopes = validation.scopes;
                }
                if let Some(secs) = validation.expires_in {
                    checked.expires_at = Some(expiry_after(Utc::now(), secs)?);
                }
                Ok(checked)
            }
            Err(AuthError::ExpiredOrInvalidGrant) => {
                tracing::info!("Token rejected by provider; refreshing");
                let refreshed = self.client.refresh(&token).await?;
                self.store.save(&refreshed)?;
                Ok(refreshed)
            }
            Err(err) => Err(err),
        }
    }

    /// Refresh and persist unconditionally.
    pub async fn refresh(&self, token: &Token) -> Result<Token, AuthError> {
        let refreshed = self.client.refresh(token).await?;
        self.store.save(&refreshed)?;
        Ok(refreshed)
    }

    /// Forget the persisted token and the one held by `registry`.
    pub fn logout(&self, registry: Option<&ScopeRegistry>) -> Result<(), AuthError> {
        if let Some(registry) = registry {
            registry.clear_token();
        }
        self.store.clear()
    }
}
