//! Session coordinator.
//!
//! Owns the access token, the single-flight refresh and the proactive refresh
//! timer. All mutable state lives behind one `std::sync::Mutex` that is never
//! held across an await point; every async step captures the session epoch
//! first and re-checks it before touching state, so a teardown that happens
//! while a call is outstanding always wins.

use crate::auth_fsm::{AuthState, SessionMachine, SessionMachineInput};
use crate::session::{SessionEvent, SessionSnapshot, SignOutReason, TokenGrant, UserIdentity};
use crate::transport::{is_auth_endpoint, AuthTransport};
use crate::{AuthError, AuthResult, CoordinatorConfig};
use chrono::{DateTime, Utc};
use credential_store::{CredentialStore, StorageChange, StorageKeys};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Callback invoked on every session state change.
///
/// Runs outside the state lock, but must not call
/// [`SessionCoordinator::set_event_callback`].
pub type SessionEventCallback = Box<dyn Fn(SessionEvent) + Send + Sync>;

type Waiter = oneshot::Sender<AuthResult<String>>;

struct ProactiveTimer {
    handle: JoinHandle<()>,
    deadline: Instant,
}

struct CoordinatorState {
    fsm: SessionMachine,
    access_token: Option<String>,
    user: Option<UserIdentity>,
    expires_at: Option<DateTime<Utc>>,
    refresh_in_flight: bool,
    /// Requests parked behind the in-flight refresh, in arrival order.
    pending: Vec<Waiter>,
    /// Bumped on every issuance and teardown.
    epoch: u64,
    logging_out: bool,
    proactive: Option<ProactiveTimer>,
}

impl CoordinatorState {
    fn new() -> Self {
        Self {
            fsm: SessionMachine::new(),
            access_token: None,
            user: None,
            expires_at: None,
            refresh_in_flight: false,
            pending: Vec::new(),
            epoch: 0,
            logging_out: false,
            proactive: None,
        }
    }

    fn auth_state(&self) -> AuthState {
        AuthState::from(self.fsm.state())
    }

    fn has_session(&self) -> bool {
        self.access_token.is_some() || self.refresh_in_flight
    }

    fn apply(&mut self, input: SessionMachineInput) -> AuthResult<()> {
        let old_state = self.auth_state();
        self.fsm.consume(&input).map_err(|_| {
            AuthError::InvalidStateTransition(format!(
                "Cannot apply {:?} in state {:?}",
                input, old_state
            ))
        })?;

        let new_state = self.auth_state();
        if old_state != new_state {
            debug!(old_state = ?old_state, new_state = ?new_state, "Session state transition");
        }
        Ok(())
    }

    /// Token a superseded refresh hands back to its callers.
    fn superseding_token(&self) -> Option<String> {
        self.access_token.clone().filter(|_| !self.logging_out)
    }

    fn cancel_proactive(&mut self) {
        if let Some(timer) = self.proactive.take() {
            timer.handle.abort();
        }
    }

    fn event(&self, reason: Option<SignOutReason>) -> SessionEvent {
        SessionEvent {
            state: self.auth_state(),
            user: self.user.clone(),
            reason,
        }
    }
}

struct Inner {
    transport: Arc<dyn AuthTransport>,
    store: Arc<dyn CredentialStore>,
    config: CoordinatorConfig,
    state: Mutex<CoordinatorState>,
    callback: Mutex<Option<SessionEventCallback>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.cancel_proactive();

        let watcher = self.watcher.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = watcher.take() {
            handle.abort();
        }
    }
}

/// Result of entering the single-flight section.
enum RefreshTicket {
    /// This caller performs the refresh.
    Leader { epoch: u64, refresh_token: String },
    /// A refresh is already running; wait for its outcome.
    Queued(oneshot::Receiver<AuthResult<String>>),
}

/// Coordinates one authenticated session for every request in this context.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

impl SessionCoordinator {
    pub fn new(
        transport: Arc<dyn AuthTransport>,
        store: Arc<dyn CredentialStore>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                config,
                state: Mutex::new(CoordinatorState::new()),
                callback: Mutex::new(None),
                watcher: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Register the callback that receives [`SessionEvent`]s.
    pub fn set_event_callback(&self, callback: SessionEventCallback) {
        *self
            .inner
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    pub fn state(&self) -> AuthState {
        self.lock().auth_state()
    }

    pub fn access_token(&self) -> Option<String> {
        self.lock().access_token.clone()
    }

    pub fn current_user(&self) -> Option<UserIdentity> {
        self.lock().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().access_token.is_some()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock();
        SessionSnapshot {
            state: state.auth_state(),
            user: state.user.clone(),
            expires_at: state.expires_at,
            refresh_in_flight: state.refresh_in_flight,
            proactive_refresh_armed: state.proactive.is_some(),
        }
    }

    /// When the armed proactive refresh will fire, if one is armed.
    pub fn proactive_refresh_deadline(&self) -> Option<Instant> {
        self.lock().proactive.as_ref().map(|timer| timer.deadline)
    }

    /// Add `Authorization: Bearer <token>` when an access token is held.
    /// Leaves the headers untouched otherwise.
    pub fn attach_auth(&self, headers: &mut HeaderMap) {
        if let Some(value) = self.access_token().as_deref().and_then(bearer_header) {
            headers.insert(AUTHORIZATION, value);
        }
    }

    /// Re-establish a session from the persisted refresh token.
    ///
    /// Returns `Ok(false)` when nothing was persisted. A rejected token
    /// clears the slot and returns [`AuthError::SessionExpired`].
    pub async fn restore(&self) -> AuthResult<bool> {
        if self.inner.store.get(StorageKeys::REFRESH_TOKEN)?.is_none() {
            info!("No persisted session found");
            let event = {
                let mut state = self.lock();
                if state.auth_state() == AuthState::Uninitialized {
                    state.apply(SessionMachineInput::SessionCleared)?;
                    Some(state.event(None))
                } else {
                    None
                }
            };
            if let Some(event) = event {
                self.notify(event);
            }
            return Ok(false);
        }

        info!("Restoring session from persisted refresh token");
        self.renew_access_token().await?;
        Ok(true)
    }

    /// Sign in with email and password.
    ///
    /// A login supersedes any refresh still in flight: its queued requests
    /// receive the new access token.
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<UserIdentity> {
        debug!(email = %email, "Attempting login");

        let grant = self
            .with_timeout(self.inner.transport.login(email, password))
            .await
            .inspect_err(|e| warn!(error = %e, "Login failed"))?;

        let user = grant.user.clone();
        let (access_token, waiters, event) = {
            let mut state = self.lock();
            let access_token = self.install_locked(&mut state, grant)?;
            state.apply(SessionMachineInput::LoginSucceeded)?;
            let waiters = std::mem::take(&mut state.pending);
            (access_token, waiters, state.event(None))
        };

        for waiter in waiters {
            let _ = waiter.send(Ok(access_token.clone()));
        }
        self.notify(event);

        info!(user_id = %user.id, "Login successful");
        Ok(user)
    }

    /// Recover from a 401 on `target` and replay the request.
    ///
    /// Auth endpoints are never recovered. Otherwise the access token is
    /// renewed (sharing any refresh already in flight) and `retry` runs once
    /// with the new token. A failed renewal ends the session and returns
    /// [`AuthError::SessionExpired`] without calling `retry`.
    pub async fn handle_unauthorized<F, Fut, T>(&self, target: &str, retry: F) -> AuthResult<T>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = AuthResult<T>>,
    {
        if is_auth_endpoint(target) {
            debug!(target = %target, "Auth endpoint rejected the request, not renewing");
            return Err(AuthError::Unauthenticated);
        }

        let access_token = self.renew_access_token().await?;
        debug!(target = %target, "Replaying request with renewed access token");
        retry(access_token).await
    }

    /// Obtain a fresh access token, performing at most one refresh call no
    /// matter how many callers ask concurrently.
    pub async fn renew_access_token(&self) -> AuthResult<String> {
        let (ticket, event) = self.enter_refresh()?;
        if let Some(event) = event {
            self.notify(event);
        }

        let (epoch, refresh_token) = match ticket {
            RefreshTicket::Queued(rx) => {
                debug!("Refresh already in flight, queueing request");
                return rx.await.unwrap_or(Err(AuthError::SessionExpired));
            }
            RefreshTicket::Leader {
                epoch,
                refresh_token,
            } => (epoch, refresh_token),
        };

        // Detached: dropping this caller must not strand the queued requests.
        let coordinator = self.clone();
        let refresh =
            tokio::spawn(async move { coordinator.run_refresh(epoch, refresh_token).await });
        match refresh.await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Refresh task did not complete");
                self.fail_refresh(epoch)
            }
        }
    }

    /// Arm (or re-arm) the proactive refresh for a token living
    /// `expires_in_seconds`. At most one timer is ever pending.
    pub fn schedule_proactive_refresh(&self, expires_in_seconds: u64) {
        let mut state = self.lock();
        self.arm_proactive_locked(&mut state, expires_in_seconds);
    }

    /// End the session.
    ///
    /// The remote revoke is best-effort; local state is cleared even if it
    /// fails or this future is dropped part-way.
    pub async fn logout(&self) {
        let (epoch, refresh_token) = {
            let mut state = self.lock();
            state.logging_out = true;
            state.epoch += 1;
            state.cancel_proactive();
            let refresh_token = self
                .inner
                .store
                .get(StorageKeys::REFRESH_TOKEN)
                .unwrap_or_else(|e| {
                    warn!(error = %e, "Failed to read refresh token during logout");
                    None
                });
            (state.epoch, refresh_token)
        };

        let _cleanup = LogoutGuard {
            coordinator: self,
            epoch,
        };

        if let Some(refresh_token) = refresh_token {
            match self
                .with_timeout(self.inner.transport.revoke(&refresh_token))
                .await
            {
                Ok(()) => debug!("Refresh token revoked"),
                Err(e) => warn!(error = %e, "Remote logout failed, clearing local session anyway"),
            }
        }

        info!("Logged out");
    }

    /// Start listening for other contexts clearing the persisted session.
    ///
    /// Returns false when the store cannot observe foreign writes. Calling it
    /// again replaces the previous listener.
    pub fn watch_external_invalidation(&self) -> bool {
        let Some(mut watcher) = self.inner.store.watch() else {
            debug!("Credential store cannot be watched, skipping cross-context invalidation");
            return false;
        };

        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(change) = watcher.changed().await {
                let Some(inner) = weak.upgrade() else { break };
                SessionCoordinator { inner }.on_storage_change(change);
            }
        });

        let mut slot = self
            .inner
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: SessionEvent) {
        let callback = self
            .inner
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = callback.as_ref() {
            callback(event);
        }
    }

    async fn with_timeout<T>(&self, call: impl Future<Output = AuthResult<T>>) -> AuthResult<T> {
        tokio::time::timeout(self.inner.config.request_timeout, call)
            .await
            .map_err(|_| AuthError::Timeout)?
    }

    fn enter_refresh(&self) -> AuthResult<(RefreshTicket, Option<SessionEvent>)> {
        let mut state = self.lock();

        if state.refresh_in_flight {
            let (tx, rx) = oneshot::channel();
            state.pending.push(tx);
            return Ok((RefreshTicket::Queued(rx), None));
        }

        if state.logging_out {
            return Err(AuthError::Unauthenticated);
        }

        let Some(refresh_token) = self.inner.store.get(StorageKeys::REFRESH_TOKEN)? else {
            if state.has_session() {
                // Slot cleared by another context before its change arrived.
                drop(state);
                self.teardown(SignOutReason::LoggedOutElsewhere);
            }
            return Err(AuthError::Unauthenticated);
        };

        let before = state.auth_state();
        let input = match before {
            AuthState::Authenticated => Some(SessionMachineInput::RefreshStarted),
            AuthState::Uninitialized | AuthState::LoggedOut => {
                Some(SessionMachineInput::RestoreStarted)
            }
            AuthState::Restoring | AuthState::Refreshing => None,
        };
        if let Some(input) = input {
            state.apply(input)?;
        }
        state.refresh_in_flight = true;

        let event = (state.auth_state() != before).then(|| state.event(None));
        let ticket = RefreshTicket::Leader {
            epoch: state.epoch,
            refresh_token,
        };
        Ok((ticket, event))
    }

    async fn run_refresh(&self, epoch: u64, refresh_token: String) -> AuthResult<String> {
        debug!("Refreshing access token");
        match self
            .with_timeout(self.inner.transport.refresh(&refresh_token))
            .await
        {
            Ok(grant) => self.finish_refresh(epoch, grant).await,
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                self.fail_refresh(epoch)
            }
        }
    }

    async fn finish_refresh(&self, epoch: u64, grant: TokenGrant) -> AuthResult<String> {
        let outcome = {
            let mut state = self.lock();
            if state.epoch != epoch {
                Err(state.superseding_token())
            } else {
                match self.install_locked(&mut state, grant.clone()) {
                    Ok(access_token) => {
                        if let Err(e) = state.apply(SessionMachineInput::RefreshSucceeded) {
                            warn!(error = %e, "Unexpected state after refresh");
                        }
                        let waiters = std::mem::take(&mut state.pending);
                        Ok(Some((access_token, waiters, state.event(None))))
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to persist rotated refresh token");
                        Ok(None)
                    }
                }
            }
        };

        match outcome {
            Ok(Some((access_token, waiters, event))) => {
                for waiter in waiters {
                    let _ = waiter.send(Ok(access_token.clone()));
                }
                self.notify(event);
                info!("Access token refreshed");
                Ok(access_token)
            }
            Ok(None) => self.fail_refresh(epoch),
            Err(current) => {
                info!("Session changed while refreshing, discarding refreshed tokens");
                if let Err(e) = self
                    .with_timeout(self.inner.transport.revoke(&grant.refresh_token))
                    .await
                {
                    debug!(error = %e, "Failed to revoke discarded refresh token");
                }
                current.ok_or(AuthError::Unauthenticated)
            }
        }
    }

    /// End the session after a failed refresh, unless a login or logout
    /// superseded that refresh while it was outstanding.
    fn fail_refresh(&self, epoch: u64) -> AuthResult<String> {
        let outcome = {
            let mut state = self.lock();
            if state.epoch == epoch {
                Ok(self.teardown_locked(&mut state, SignOutReason::SessionExpired))
            } else {
                Err(state.superseding_token())
            }
        };

        match outcome {
            Ok((waiters, event)) => {
                Self::reject(waiters, SignOutReason::SessionExpired);
                self.notify(event);
                Err(AuthError::SessionExpired)
            }
            Err(current) => {
                info!("Session changed while refreshing, ignoring failed refresh");
                current.ok_or(AuthError::Unauthenticated)
            }
        }
    }

    fn teardown(&self, reason: SignOutReason) {
        let (waiters, event) = {
            let mut state = self.lock();
            self.teardown_locked(&mut state, reason)
        };
        Self::reject(waiters, reason);
        self.notify(event);
    }

    /// Clear every piece of session state. Queued requests are handed back
    /// to the caller, to be rejected once the lock is released.
    fn teardown_locked(
        &self,
        state: &mut CoordinatorState,
        reason: SignOutReason,
    ) -> (Vec<Waiter>, SessionEvent) {
        state.epoch += 1;
        state.cancel_proactive();
        state.access_token = None;
        state.user = None;
        state.expires_at = None;
        state.refresh_in_flight = false;
        state.logging_out = false;

        if let Err(e) = self.inner.store.delete(StorageKeys::REFRESH_TOKEN) {
            warn!(error = %e, "Failed to delete persisted refresh token");
        }

        let input = match reason {
            SignOutReason::SessionExpired => SessionMachineInput::RefreshFailed,
            SignOutReason::Logout | SignOutReason::LoggedOutElsewhere => {
                SessionMachineInput::SessionCleared
            }
        };
        if state.apply(input).is_err() {
            if let Err(e) = state.apply(SessionMachineInput::SessionCleared) {
                warn!(error = %e, "Unexpected state after teardown");
            }
        }

        info!(reason = ?reason, "Session ended");
        (std::mem::take(&mut state.pending), state.event(Some(reason)))
    }

    fn reject(waiters: Vec<Waiter>, reason: SignOutReason) {
        for waiter in waiters {
            let error = match reason {
                SignOutReason::SessionExpired => AuthError::SessionExpired,
                SignOutReason::Logout | SignOutReason::LoggedOutElsewhere => {
                    AuthError::Unauthenticated
                }
            };
            let _ = waiter.send(Err(error));
        }
    }

    /// Adopt a grant: persist the refresh token, hold the access token and
    /// re-arm the proactive timer.
    fn install_locked(&self, state: &mut CoordinatorState, grant: TokenGrant) -> AuthResult<String> {
        self.inner
            .store
            .set(StorageKeys::REFRESH_TOKEN, &grant.refresh_token)?;

        state.epoch += 1;
        state.expires_at = Some(grant.expires_at(Utc::now()));
        state.access_token = Some(grant.access_token.clone());
        state.user = Some(grant.user);
        state.refresh_in_flight = false;
        state.logging_out = false;
        self.arm_proactive_locked(state, grant.expires_in_seconds);

        Ok(grant.access_token)
    }

    fn arm_proactive_locked(&self, state: &mut CoordinatorState, expires_in_seconds: u64) {
        state.cancel_proactive();

        let delay = self.inner.config.proactive_delay(expires_in_seconds);
        let epoch = state.epoch;
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                SessionCoordinator { inner }.run_proactive_refresh(epoch).await;
            }
        });

        state.proactive = Some(ProactiveTimer {
            handle,
            deadline: Instant::now() + delay,
        });
        debug!(delay_secs = delay.as_secs(), "Proactive refresh armed");
    }

    async fn run_proactive_refresh(&self, epoch: u64) {
        let current = {
            let mut state = self.lock();
            if state.epoch == epoch {
                // Detach rather than abort: this task is the timer.
                state.proactive = None;
                true
            } else {
                false
            }
        };
        if !current {
            debug!("Stale proactive refresh timer fired, ignoring");
            return;
        }

        info!("Proactive refresh timer fired");
        if let Err(e) = self.renew_access_token().await {
            warn!(error = %e, "Proactive refresh failed");
        }
    }

    fn on_storage_change(&self, change: StorageChange) {
        let cleared = match &change {
            StorageChange::Removed { key } => key == StorageKeys::REFRESH_TOKEN,
            StorageChange::Resync => {
                matches!(self.inner.store.get(StorageKeys::REFRESH_TOKEN), Ok(None))
            }
            StorageChange::Updated { key, .. } => {
                if key == StorageKeys::REFRESH_TOKEN {
                    debug!("Refresh token rotated by another context");
                }
                false
            }
        };

        if !cleared || !self.lock().has_session() {
            return;
        }

        info!("Session cleared by another context");
        self.teardown(SignOutReason::LoggedOutElsewhere);
    }
}

/// Clears the local session when `logout` finishes or is dropped part-way.
struct LogoutGuard<'a> {
    coordinator: &'a SessionCoordinator,
    epoch: u64,
}

impl Drop for LogoutGuard<'_> {
    fn drop(&mut self) {
        // A login that completed during the revoke call takes precedence.
        if self.coordinator.lock().epoch == self.epoch {
            self.coordinator.teardown(SignOutReason::Logout);
        }
    }
}

pub(crate) fn bearer_header(token: &str) -> Option<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).ok()?;
    value.set_sensitive(true);
    Some(value)
}
