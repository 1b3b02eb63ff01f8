//! Scope registry and the debounced reauthorization pipeline.
//!
//! Consumers declare scopes at any time. Genuinely new scopes (re)start a
//! debounce timer; when it expires without being superseded, one cycle
//! requests a device code for the full scope set, announces the pairing
//! code, and polls until the provider resolves it. At most one cycle is in
//! flight. Scopes declared while a cycle is polling are held back and start
//! their own debounce once that cycle exits.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use strum::Display;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::events::{ReauthEvent, ReauthEventSink, ReauthFailure, ReauthInfo};
use super::request::ScopeRequest;
use crate::auth::{AuthError, DeviceAuthFlow, Token};
use crate::config::AuthConfig;
use crate::util::sync::{MutexExt, RwLockExt};

/// Where the registry is in its debounce/reauthorization cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ReauthPhase {
    #[default]
    Idle,
    DebounceWaiting,
    ReauthInFlight,
}

/// Authoritative scope set plus the reauthorization state machine.
///
/// Cloning is cheap and every clone drives the same registry.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use scopeauth::auth::DeviceAuthClient;
/// use scopeauth::config::AuthConfig;
/// use scopeauth::scope::{ReauthEvent, ScopeRegistry};
///
/// # async fn run() {
/// let config = AuthConfig::builder().client_id("my-client").build();
/// let client = Arc::new(DeviceAuthClient::new(reqwest::Client::new(), &config));
/// let registry = ScopeRegistry::from_config(client, &config);
/// let mut events = registry.subscribe();
///
/// registry.register_scopes("Core", &[("chat:read", None), ("chat:edit", Some("send replies"))]);
/// while let Some(event) = events.recv().await {
///     if let ReauthEvent::Required(info) = event {
///         println!("Visit {} and enter {}", info.verification_url, info.user_code);
///     }
/// }
/// # }
/// ```
#[derive(Clone)]
pub struct ScopeRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    flow: Arc<dyn DeviceAuthFlow>,
    debounce: Duration,
    runtime: Handle,
    scopes: RwLock<BTreeMap<String, ScopeRequest>>,
    token: RwLock<Option<Arc<Token>>>,
    authenticated_scopes: RwLock<Arc<BTreeSet<String>>>,
    sinks: RwLock<Vec<ReauthEventSink>>,
    cycle: Mutex<CycleState>,
    in_flight: AtomicUsize,
}

#[derive(Default)]
struct CycleState {
    phase: ReauthPhase,
    generation: u64,
    cancel: Option<CancellationToken>,
    /// Scopes added since the last cycle took its snapshot.
    pending_new: BTreeSet<String>,
    /// Scopes added by the most recent qualifying registration.
    latest_new: Vec<String>,
}

impl std::fmt::Debug for ScopeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeRegistry")
            .field("debounce", &self.inner.debounce)
            .field("phase", &self.phase())
            .field("scopes", &self.scope_names())
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

impl ScopeRegistry {
    /// Create a registry that spawns its cycles on the current Tokio runtime.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn new(flow: Arc<dyn DeviceAuthFlow>, debounce: Duration) -> Self {
        Self::with_runtime(flow, debounce, Handle::current())
    }

    pub fn from_config(flow: Arc<dyn DeviceAuthFlow>, config: &AuthConfig) -> Self {
        Self::new(flow, config.debounce)
    }

    pub fn with_runtime(flow: Arc<dyn DeviceAuthFlow>, debounce: Duration, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                flow,
                debounce,
                runtime,
                scopes: RwLock::new(BTreeMap::new()),
                token: RwLock::new(None),
                authenticated_scopes: RwLock::new(Arc::new(BTreeSet::new())),
                sinks: RwLock::new(Vec::new()),
                cycle: Mutex::new(CycleState::default()),
                in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Seed the registry with a previously persisted token.
    pub fn with_token(self, token: Token) -> Self {
        self.set_token(token);
        self
    }

    /// Declare scopes on behalf of `requester`.
    ///
    /// Returns the scopes that were not already registered. When that list is
    /// non-empty and the held token does not already grant everything, a
    /// debounced reauthorization is scheduled. Never blocks on the network.
    pub fn register_scopes(&self, requester: &str, scopes: &[(&str, Option<&str>)]) -> Vec<String> {
        let added = {
            let mut registered = self.inner.scopes.write_or_recover();
            let mut added = Vec::new();
            for (scope, reason) in scopes {
                let scope = scope.trim();
                if scope.is_empty() || registered.contains_key(scope) {
                    continue;
                }
                registered.insert(
                    scope.to_string(),
                    ScopeRequest::new(scope, requester, reason.map(str::to_string)),
                );
                added.push(scope.to_string());
            }
            added
        };

        if added.is_empty() {
            tracing::trace!(requester, "No new scopes registered");
            return added;
        }
        tracing::info!(requester, new_scopes = ?added, "Scopes registered");

        if self.has_all_required_scopes() {
            tracing::debug!(requester, "Held token already grants new scopes");
            return added;
        }
        self.inner.schedule(&added);
        added
    }

    /// Remove scopes previously registered by `requester`.
    ///
    /// Entries owned by other requesters are left alone. Never triggers
    /// reauthorization.
    pub fn unregister_scopes(&self, requester: &str, scopes: &[&str]) -> Vec<String> {
        let mut registered = self.inner.scopes.write_or_recover();
        let mut removed = Vec::new();
        for scope in scopes {
            let owned = registered
                .get(*scope)
                .is_some_and(|request| request.requester == requester);
            if owned {
                registered.remove(*scope);
                removed.push(scope.to_string());
            }
        }
        drop(registered);
        if !removed.is_empty() {
            tracing::info!(requester, removed = ?removed, "Scopes unregistered");
        }
        removed
    }

    /// True only when a token is held and it grants every registered scope.
    pub fn has_all_required_scopes(&self) -> bool {
        self.inner.has_all_required_scopes()
    }

    /// Registered scopes the held token does not grant. Every scope is
    /// missing when no token is held.
    pub fn missing_scopes(&self) -> Vec<String> {
        let token = self.current_token();
        self.inner
            .scopes
            .read_or_recover()
            .keys()
            .filter(|scope| !token.as_ref().is_some_and(|t| t.grants(scope)))
            .cloned()
            .collect()
    }

    pub fn scope_requests(&self) -> Vec<ScopeRequest> {
        self.inner.scopes.read_or_recover().values().cloned().collect()
    }

    pub fn scope_requests_by(&self, requester: &str) -> Vec<ScopeRequest> {
        self.inner
            .scopes
            .read_or_recover()
            .values()
            .filter(|request| request.requester == requester)
            .cloned()
            .collect()
    }

    pub fn scope_names(&self) -> Vec<String> {
        self.inner.scope_names()
    }

    /// Scopes covered by the last successful cycle.
    pub fn authenticated_scopes(&self) -> Vec<String> {
        self.inner
            .authenticated_scopes
            .read_or_recover()
            .iter()
            .cloned()
            .collect()
    }

    pub fn current_token(&self) -> Option<Arc<Token>> {
        self.inner.token.read_or_recover().clone()
    }

    /// Replace the held token, e.g. after loading or refreshing it.
    pub fn set_token(&self, token: Token) {
        *self.inner.token.write_or_recover() = Some(Arc::new(token));
    }

    pub fn clear_token(&self) -> Option<Arc<Token>> {
        self.inner.token.write_or_recover().take()
    }

    pub fn add_event_sink(&self, sink: ReauthEventSink) {
        self.inner.sinks.write_or_recover().push(sink);
    }

    /// Receive every event emitted after this call.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ReauthEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.add_event_sink(Arc::new(move |event: &ReauthEvent| {
            let _ = tx.send(event.clone());
        }));
        rx
    }

    pub fn phase(&self) -> ReauthPhase {
        self.inner.cycle.lock_or_recover().phase
    }

    /// Number of cycles currently talking to the provider (0 or 1).
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Whether an outbound authorization request is active, e.g. to decide
    /// whether to wait before shutting down.
    pub fn is_request_in_flight(&self) -> bool {
        self.in_flight_count() > 0
    }

    /// Cancel the pending debounce wait or the in-flight poll.
    ///
    /// A cancelled debounce emits nothing; a cancelled poll resolves the cycle
    /// with a cancellation failure. Returns whether anything was cancelled.
    pub fn cancel_pending(&self) -> bool {
        let mut cycle = self.inner.cycle.lock_or_recover();
        let Some(cancel) = cycle.cancel.take() else {
            return false;
        };
        cancel.cancel();
        if cycle.phase == ReauthPhase::DebounceWaiting {
            cycle.phase = ReauthPhase::Idle;
        }
        tracing::info!(phase = %cycle.phase, "Pending reauthorization cancelled");
        true
    }
}

impl Inner {
    fn scope_names(&self) -> Vec<String> {
        self.scopes.read_or_recover().keys().cloned().collect()
    }

    fn has_all_required_scopes(&self) -> bool {
        let Some(token) = self.token.read_or_recover().clone() else {
            return false;
        };
        self.scopes
            .read_or_recover()
            .keys()
            .all(|scope| token.grants(scope))
    }

    /// Start or restart the debounce wait, or hold the scopes back while a
    /// cycle is in flight. Check-and-start runs under the cycle lock.
    fn schedule(self: &Arc<Self>, new_scopes: &[String]) {
        let mut cycle = self.cycle.lock_or_recover();
        cycle.pending_new.extend(new_scopes.iter().cloned());
        if !new_scopes.is_empty() {
            cycle.latest_new = new_scopes.to_vec();
        }

        if cycle.phase == ReauthPhase::ReauthInFlight {
            tracing::debug!(
                pending = cycle.pending_new.len(),
                "Reauthorization in flight; deferring new scopes"
            );
            return;
        }
        if let Some(previous) = cycle.cancel.take() {
            previous.cancel();
            tracing::debug!("Superseding pending debounce wait");
        }

        let cancel = CancellationToken::new();
        cycle.generation += 1;
        cycle.phase = ReauthPhase::DebounceWaiting;
        cycle.cancel = Some(cancel.clone());
        let generation = cycle.generation;
        drop(cycle);

        let inner = Arc::clone(self);
        self.runtime
            .spawn(async move { inner.debounce_then_reauth(generation, cancel).await });
    }

    async fn debounce_then_reauth(self: Arc<Self>, generation: u64, cancel: CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(generation, "Debounce wait cancelled");
                return;
            }
            _ = tokio::time::sleep(self.debounce) => {}
        }

        let (latest, accumulated) = {
            let mut cycle = self.cycle.lock_or_recover();
            if cycle.generation != generation || cancel.is_cancelled() {
                tracing::debug!(generation, "Debounce wait superseded");
                return;
            }
            if cycle.phase == ReauthPhase::ReauthInFlight {
                // schedule() never starts a debounce while a cycle is in flight
                tracing::error!(generation, "Reauthorization already in flight; dropping cycle");
                return;
            }
            if self.has_all_required_scopes() {
                tracing::debug!(generation, "Held token grants every scope; skipping cycle");
                cycle.phase = ReauthPhase::Idle;
                cycle.cancel = None;
                cycle.pending_new.clear();
                cycle.latest_new.clear();
                return;
            }
            cycle.phase = ReauthPhase::ReauthInFlight;
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            (
                std::mem::take(&mut cycle.latest_new),
                std::mem::take(&mut cycle.pending_new),
            )
        };

        let _guard = CycleGuard {
            inner: Arc::clone(&self),
        };
        self.run_cycle(latest, accumulated.into_iter().collect(), cancel)
            .await;
    }

    async fn run_cycle(
        &self,
        new_scopes: Vec<String>,
        accumulated_scopes: Vec<String>,
        cancel: CancellationToken,
    ) {
        let cycle_id = Uuid::new_v4();
        let all_scopes = self.scope_names();
        if all_scopes.is_empty() {
            tracing::debug!(%cycle_id, "Every scope was unregistered; nothing to authorize");
            return;
        }
        tracing::info!(
            %cycle_id,
            scope_count = all_scopes.len(),
            new_scopes = ?accumulated_scopes,
            "Starting reauthorization"
        );

        let session = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AuthError::Cancelled),
            result = self.flow.initiate_session(&all_scopes) => result,
        };
        let session = match session {
            Ok(session) => session,
            Err(error) => {
                tracing::warn!(%cycle_id, error = %error, "Device code request failed");
                self.emit(&ReauthEvent::Failed(ReauthFailure { cycle_id, error }));
                return;
            }
        };

        self.emit(&ReauthEvent::Required(ReauthInfo {
            cycle_id,
            user_code: session.user_code.clone(),
            verification_url: session.verification_url.clone(),
            new_scopes,
            accumulated_scopes,
            all_scopes: all_scopes.clone(),
            cancel: cancel.clone(),
        }));

        match self.flow.poll_until_resolved(&session, &cancel).await {
            Ok(token) => {
                let token = Arc::new(token);
                *self.token.write_or_recover() = Some(Arc::clone(&token));
                *self.authenticated_scopes.write_or_recover() =
                    Arc::new(all_scopes.into_iter().collect());
                tracing::info!(%cycle_id, "Reauthorization completed");
                self.emit(&ReauthEvent::Completed(token));
            }
            Err(error) => {
                if error.is_cancelled() {
                    tracing::info!(%cycle_id, "Reauthorization cancelled");
                } else {
                    tracing::warn!(%cycle_id, error = %error, "Reauthorization failed");
                }
                self.emit(&ReauthEvent::Failed(ReauthFailure { cycle_id, error }));
            }
        }
    }

    /// Start a debounce for scopes held back during the cycle that just
    /// exited, unless the new token already covers them.
    fn resume_deferred(self: &Arc<Self>) {
        {
            let mut cycle = self.cycle.lock_or_recover();
            if cycle.phase != ReauthPhase::Idle || cycle.pending_new.is_empty() {
                return;
            }
            if self.has_all_required_scopes() {
                cycle.pending_new.clear();
                cycle.latest_new.clear();
                return;
            }
        }
        tracing::debug!("Scheduling deferred reauthorization");
        self.schedule(&[]);
    }

    fn emit(&self, event: &ReauthEvent) {
        let sinks = self.sinks.read_or_recover().clone();
        for sink in sinks {
            sink(event);
        }
    }
}

/// Returns the registry to `Idle` however the cycle exits, including a
/// panicking event sink, then picks up scopes deferred during the cycle.
struct CycleGuard {
    inner: Arc<Inner>,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        {
            let mut cycle = self.inner.cycle.lock_or_recover();
            cycle.phase = ReauthPhase::Idle;
            cycle.cancel = None;
            self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        self.inner.resume_deferred();
    }
}
