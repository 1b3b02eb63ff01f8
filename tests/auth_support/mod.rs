#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use scopeauth::auth::{AuthError, DeviceAuthFlow, DeviceCodeSession, Token, TokenStore};
use scopeauth::scope::{ReauthEvent, ReauthPhase, ScopeRegistry};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct InMemoryTokenStore {
    token: Mutex<Option<Token>>,
    saves: AtomicUsize,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(token: Token) -> Self {
        let store = Self::default();
        *store.token.lock().expect("store lock poisoned") = Some(token);
        store
    }

    pub fn get(&self) -> Option<Token> {
        self.token.lock().expect("store lock poisoned").clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl TokenStore for InMemoryTokenStore {
    fn load(&self) -> Result<Option<Token>, AuthError> {
        Ok(self.get())
    }

    fn save(&self, token: &Token) -> Result<(), AuthError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.token.lock().expect("store lock poisoned") = Some(token.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), AuthError> {
        *self.token.lock().expect("store lock poisoned") = None;
        Ok(())
    }
}

pub fn token(access_token: &str, scopes: &[&str]) -> Token {
    Token {
        access_token: access_token.to_string(),
        refresh_token: Some(format!("{access_token}-refresh")),
        scopes: scopes.iter().map(|s| s.to_string()).collect(),
        token_type: "bearer".to_string(),
        expires_at: None,
        last_refresh: Some(Utc::now()),
    }
}

pub fn session(
    scopes: &[String],
    interval: Duration,
    expires_in: chrono::Duration,
) -> DeviceCodeSession {
    let issued_at = Utc::now();
    DeviceCodeSession {
        client_id: "test-client".to_string(),
        device_code: "device-code-1".to_string(),
        user_code: "ABCD-EFGH".to_string(),
        verification_url: "https://www.twitch.tv/activate".to_string(),
        scopes: scopes.to_vec(),
        issued_at,
        expires_at: issued_at + expires_in,
        interval,
    }
}

/// How the scripted flow resolves a poll.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// Grant exactly the session's scopes.
    Grant,
    Fail(AuthError),
    /// Wait for [`ScriptedFlow::release`] (or cancellation), then grant.
    Gated,
}

/// In-process [`DeviceAuthFlow`] that records calls instead of hitting a provider.
pub struct ScriptedFlow {
    initiated: Mutex<Vec<Vec<String>>>,
    initiate_error: Mutex<Option<AuthError>>,
    outcome: Mutex<PollOutcome>,
    gate: Notify,
    active_polls: AtomicUsize,
    max_concurrent_polls: AtomicUsize,
    issued: AtomicUsize,
}

impl ScriptedFlow {
    pub fn new(outcome: PollOutcome) -> Arc<Self> {
        Arc::new(Self {
            initiated: Mutex::new(Vec::new()),
            initiate_error: Mutex::new(None),
            outcome: Mutex::new(outcome),
            gate: Notify::new(),
            active_polls: AtomicUsize::new(0),
            max_concurrent_polls: AtomicUsize::new(0),
            issued: AtomicUsize::new(0),
        })
    }

    pub fn fail_next_initiate(&self, error: AuthError) {
        *self.initiate_error.lock().expect("flow lock poisoned") = Some(error);
    }

    pub fn set_outcome(&self, outcome: PollOutcome) {
        *self.outcome.lock().expect("flow lock poisoned") = outcome;
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn initiated(&self) -> Vec<Vec<String>> {
        self.initiated.lock().expect("flow lock poisoned").clone()
    }

    pub fn max_concurrent_polls(&self) -> usize {
        self.max_concurrent_polls.load(Ordering::SeqCst)
    }

    fn grant(&self, session: &DeviceCodeSession) -> Token {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let scopes: Vec<&str> = session.scopes.iter().map(String::as_str).collect();
        token(&format!("access-{n}"), &scopes)
    }
}

#[async_trait]
impl DeviceAuthFlow for ScriptedFlow {
    async fn initiate_session(&self, scopes: &[String]) -> Result<DeviceCodeSession, AuthError> {
        self.initiated
            .lock()
            .expect("flow lock poisoned")
            .push(scopes.to_vec());
        let failure = self.initiate_error.lock().expect("flow lock poisoned").take();
        if let Some(error) = failure {
            return Err(error);
        }
        Ok(session(
            scopes,
            Duration::from_secs(5),
            chrono::Duration::seconds(1800),
        ))
    }

    async fn poll_until_resolved(
        &self,
        session: &DeviceCodeSession,
        cancel: &CancellationToken,
    ) -> Result<Token, AuthError> {
        let active = self.active_polls.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_polls.fetch_max(active, Ordering::SeqCst);
        let outcome = self.outcome.lock().expect("flow lock poisoned").clone();
        let result = match outcome {
            PollOutcome::Grant => Ok(self.grant(session)),
            PollOutcome::Fail(error) => Err(error),
            PollOutcome::Gated => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(AuthError::Cancelled),
                    _ = self.gate.notified() => Ok(self.grant(session)),
                }
            }
        };
        self.active_polls.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub async fn next_event(events: &mut mpsc::UnboundedReceiver<ReauthEvent>) -> ReauthEvent {
    tokio::time::timeout(Duration::from_secs(120), events.recv())
        .await
        .expect("timed out waiting for reauth event")
        .expect("event stream closed")
}

pub async fn wait_until_idle(registry: &ScopeRegistry) {
    tokio::time::timeout(Duration::from_secs(120), async {
        while registry.is_request_in_flight() || registry.phase() != ReauthPhase::Idle {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("registry did not return to idle");
}

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
