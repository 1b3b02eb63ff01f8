//! Reauthorization lifecycle events.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::{AuthError, AuthStatus, Token, TokenStore};

/// Callback invoked synchronously for every reauthorization event.
pub type ReauthEventSink = Arc<dyn Fn(&ReauthEvent) + Send + Sync>;

/// Pairing instructions for one reauthorization cycle.
#[derive(Debug, Clone)]
pub struct ReauthInfo {
    pub cycle_id: uuid::Uuid,
    pub user_code: String,
    pub verification_url: String,
    /// Scopes added by the registration that last restarted the debounce.
    pub new_scopes: Vec<String>,
    /// Every scope added since the previous cycle started, across all
    /// registrations folded into this one.
    pub accumulated_scopes: Vec<String>,
    /// Every scope the new token will cover.
    pub all_scopes: Vec<String>,
    /// Cancels this cycle's polling.
    pub cancel: CancellationToken,
}

/// Why a cycle ended without a token.
#[derive(Debug, Clone)]
pub struct ReauthFailure {
    pub cycle_id: uuid::Uuid,
    pub error: AuthError,
}

impl ReauthFailure {
    pub fn message(&self) -> String {
        self.error.to_string()
    }

    pub fn status(&self) -> AuthStatus {
        self.error.status()
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.is_cancelled()
    }
}

/// Per cycle these fire in the order `Required` then `Completed` or `Failed`.
/// A cycle whose session request fails emits only `Failed`.
#[derive(Debug, Clone)]
pub enum ReauthEvent {
    Required(ReauthInfo),
    Completed(Arc<Token>),
    Failed(ReauthFailure),
}

/// Sink that persists each newly issued token.
pub fn persist_on_completion(store: Arc<dyn TokenStore>) -> ReauthEventSink {
    Arc::new(move |event| {
        if let ReauthEvent::Completed(token) = event {
            if let Err(e) = store.save(token) {
                tracing::error!(error = %e, "Failed to persist token after reauthorization");
            }
        }
    })
}
