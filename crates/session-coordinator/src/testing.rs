//! Scripted transport for coordinator tests.

use crate::session::{TokenGrant, UserIdentity};
use crate::transport::AuthTransport;
use crate::{AuthError, AuthResult, CoordinatorConfig, DEFAULT_API_URL};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

pub(crate) const TOKEN_LIFETIME_SECS: u64 = 900;

pub(crate) fn test_config() -> CoordinatorConfig {
    CoordinatorConfig::new(DEFAULT_API_URL).unwrap()
}

pub(crate) fn grant(access_token: &str, refresh_token: &str) -> TokenGrant {
    TokenGrant {
        access_token: access_token.to_string(),
        refresh_token: refresh_token.to_string(),
        expires_in_seconds: TOKEN_LIFETIME_SECS,
        user: UserIdentity {
            id: "u-1".to_string(),
            email: "ana@example.com".to_string(),
            name: Some("Ana".to_string()),
            role: "admin".to_string(),
        },
    }
}

/// Transport that hands out numbered tokens.
///
/// Login always yields `at-login`/`rt-login`; the n-th refresh call yields
/// `at-n`/`rt-n` unless a failure was scripted for it.
#[derive(Default)]
pub(crate) struct MockTransport {
    refresh_calls: AtomicUsize,
    refresh_tokens_seen: Mutex<Vec<String>>,
    revoked: Mutex<Vec<String>>,
    login_failures: Mutex<VecDeque<AuthError>>,
    refresh_failures: Mutex<VecDeque<AuthError>>,
    revoke_failures: Mutex<VecDeque<AuthError>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    revoke_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Block refresh calls until permits are added to the returned semaphore.
    pub(crate) fn hold_refreshes(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Block revoke calls the same way.
    pub(crate) fn hold_revokes(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.revoke_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub(crate) fn fail_next_login(&self, error: AuthError) {
        self.login_failures.lock().unwrap().push_back(error);
    }

    pub(crate) fn fail_next_refresh(&self, error: AuthError) {
        self.refresh_failures.lock().unwrap().push_back(error);
    }

    pub(crate) fn fail_next_revoke(&self, error: AuthError) {
        self.revoke_failures.lock().unwrap().push_back(error);
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn refresh_tokens_seen(&self) -> Vec<String> {
        self.refresh_tokens_seen.lock().unwrap().clone()
    }

    pub(crate) fn revoked(&self) -> Vec<String> {
        self.revoked.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuthTransport for MockTransport {
    async fn login(&self, _email: &str, _password: &str) -> AuthResult<TokenGrant> {
        if let Some(error) = self.login_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(grant("at-login", "rt-login"))
    }

    async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenGrant> {
        let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.refresh_tokens_seen
            .lock()
            .unwrap()
            .push(refresh_token.to_string());

        let gate = self.gate.lock().unwrap().clone();
        pass_gate(gate).await;

        if let Some(error) = self.refresh_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(grant(&format!("at-{}", call), &format!("rt-{}", call)))
    }

    async fn revoke(&self, refresh_token: &str) -> AuthResult<()> {
        self.revoked.lock().unwrap().push(refresh_token.to_string());
        let gate = self.revoke_gate.lock().unwrap().clone();
        pass_gate(gate).await;

        if let Some(error) = self.revoke_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(())
    }
}

async fn pass_gate(gate: Option<Arc<Semaphore>>) {
    if let Some(gate) = gate {
        if let Ok(permit) = gate.acquire().await {
            permit.forget();
        }
    }
}
