//! Common test utilities for all integration tests.
//!
//! Scripted stand-ins for the secret store, the login method, and the token
//! endpoints, plus a manually driven wall clock.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vault_lease::secrets::{
    Clock, ClientAuthentication, Lease, LeaseOperations, LoginToken, Result, SecretLeaseError,
    SecretLeaseEvent, SecretResponse, SecretsError, TokenLookup, TokenOperations, VaultToken,
};

/// A secret response with lease metadata.
pub fn leased(lease_id: &str, seconds: u64, renewable: bool, data: Value) -> SecretResponse {
    SecretResponse {
        request_id: format!("req-{}", lease_id),
        lease_id: lease_id.to_string(),
        lease_duration: seconds,
        renewable,
        data: Some(data),
        warnings: None,
        wrap_info: None,
    }
}

/// Database-style credentials under a lease.
pub fn credentials(lease_id: &str, seconds: u64, password: &str) -> SecretResponse {
    leased(lease_id, seconds, true, json!({"username": "v-app", "password": password}))
}

/// How a scripted renew call ends.
pub enum RenewOutcome {
    Extend(Duration),
    Fail(fn() -> SecretsError),
}

/// Scripted secret store.
///
/// `fetch` pops the next response queued for a path (the last one repeats) and
/// reports unknown paths as not found. `renew` follows the queued outcomes and
/// otherwise extends the lease by its current duration.
#[derive(Default)]
pub struct MockLeaseOperations {
    responses: Mutex<HashMap<String, VecDeque<SecretResponse>>>,
    renewals: Mutex<VecDeque<RenewOutcome>>,
    failing_fetches: Mutex<HashSet<String>>,
    failing_revocations: Mutex<HashSet<String>>,
    fetch_delay: Mutex<Duration>,
    fetches: Mutex<HashMap<String, usize>>,
    renewed: Mutex<Vec<String>>,
    revoked: Mutex<Vec<String>>,
}

impl MockLeaseOperations {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, path: &str, response: SecretResponse) {
        self.responses.lock().unwrap().entry(path.to_string()).or_default().push_back(response);
    }

    pub fn fail_fetch(&self, path: &str) {
        self.failing_fetches.lock().unwrap().insert(path.to_string());
    }

    pub fn then_renew(&self, outcome: RenewOutcome) {
        self.renewals.lock().unwrap().push_back(outcome);
    }

    /// Make every following fetch take `delay`.
    pub fn slow_fetches(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    pub fn fail_revoke(&self, lease_id: &str) {
        self.failing_revocations.lock().unwrap().insert(lease_id.to_string());
    }

    pub fn fetch_count(&self, path: &str) -> usize {
        self.fetches.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn renewed(&self) -> Vec<String> {
        self.renewed.lock().unwrap().clone()
    }

    pub fn revoked(&self) -> Vec<String> {
        let mut revoked = self.revoked.lock().unwrap().clone();
        revoked.sort();
        revoked
    }
}

#[async_trait]
impl LeaseOperations for MockLeaseOperations {
    async fn fetch(&self, path: &str) -> Result<SecretResponse> {
        *self.fetches.lock().unwrap().entry(path.to_string()).or_default() += 1;
        let delay = *self.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing_fetches.lock().unwrap().contains(path) {
            return Err(SecretsError::backend_error(500, "internal error"));
        }

        let mut responses = self.responses.lock().unwrap();
        let queue = responses.get_mut(path).ok_or_else(|| SecretsError::not_found(path))?;
        let response = if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() };
        response.ok_or_else(|| SecretsError::not_found(path))
    }

    async fn renew(&self, lease: &Lease, _increment: Option<Duration>) -> Result<Lease> {
        self.renewed.lock().unwrap().push(lease.lease_id().to_string());
        let outcome = self.renewals.lock().unwrap().pop_front();
        match outcome {
            Some(RenewOutcome::Extend(duration)) => Lease::of(lease.lease_id(), duration, true),
            Some(RenewOutcome::Fail(error)) => Err(error()),
            None => Lease::of(lease.lease_id(), lease.lease_duration(), true),
        }
    }

    async fn revoke(&self, lease: &Lease) -> Result<()> {
        if self.failing_revocations.lock().unwrap().contains(lease.lease_id()) {
            return Err(SecretsError::backend_error(503, "sealed"));
        }
        self.revoked.lock().unwrap().push(lease.lease_id().to_string());
        Ok(())
    }
}

/// Login method handing out numbered tokens.
pub struct MockAuthentication {
    ttl: Duration,
    renewable: bool,
    owns_token: bool,
    delay: Duration,
    fail: Mutex<bool>,
    logins: AtomicUsize,
}

impl MockAuthentication {
    pub fn new(ttl: Duration, renewable: bool) -> Arc<Self> {
        Arc::new(Self::build(ttl, renewable, true, Duration::ZERO))
    }

    /// A login that takes `delay` to complete.
    pub fn slow(ttl: Duration, delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(ttl, false, true, delay))
    }

    /// A token supplied from outside; never revoked by the session.
    pub fn external(ttl: Duration) -> Arc<Self> {
        Arc::new(Self::build(ttl, false, false, Duration::ZERO))
    }

    fn build(ttl: Duration, renewable: bool, owns_token: bool, delay: Duration) -> Self {
        Self { ttl, renewable, owns_token, delay, fail: Mutex::new(false), logins: AtomicUsize::new(0) }
    }

    pub fn fail_logins(&self) {
        *self.fail.lock().unwrap() = true;
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientAuthentication for MockAuthentication {
    async fn login(&self) -> Result<LoginToken> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if *self.fail.lock().unwrap() {
            return Err(SecretsError::authentication_failed("invalid secret_id"));
        }
        let count = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(LoginToken::new(VaultToken::new(format!("s.login-{}", count)), self.ttl, self.renewable))
    }

    fn method(&self) -> &'static str {
        "mock"
    }

    fn owns_token(&self) -> bool {
        self.owns_token
    }
}

/// Token self-operations with scripted results.
pub struct MockTokenOperations {
    renew_ttl: Duration,
    lookup_ttl: Duration,
    fail_renew: Mutex<bool>,
    renewals: AtomicUsize,
    lookups: AtomicUsize,
    revoked: Mutex<Vec<String>>,
}

impl MockTokenOperations {
    pub fn new(renew_ttl: Duration) -> Arc<Self> {
        Self::with_lookup(renew_ttl, Duration::ZERO)
    }

    pub fn with_lookup(renew_ttl: Duration, lookup_ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            renew_ttl,
            lookup_ttl,
            fail_renew: Mutex::new(false),
            renewals: AtomicUsize::new(0),
            lookups: AtomicUsize::new(0),
            revoked: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_renewals(&self) {
        *self.fail_renew.lock().unwrap() = true;
    }

    pub fn renewals(&self) -> usize {
        self.renewals.load(Ordering::SeqCst)
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn revoked(&self) -> Vec<String> {
        self.revoked.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenOperations for MockTokenOperations {
    async fn renew_self(&self, token: &VaultToken) -> Result<LoginToken> {
        self.renewals.fetch_add(1, Ordering::SeqCst);
        if *self.fail_renew.lock().unwrap() {
            return Err(SecretsError::connection_failed("connection reset"));
        }
        Ok(LoginToken::new(token.clone(), self.renew_ttl, true))
    }

    async fn lookup_self(&self, _token: &VaultToken) -> Result<TokenLookup> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(TokenLookup { ttl: self.lookup_ttl, renewable: false })
    }

    async fn revoke_self(&self, token: &VaultToken) -> Result<()> {
        self.revoked.lock().unwrap().push(token.expose().to_string());
        Ok(())
    }
}

/// Wall clock moved by hand.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { now: Mutex::new(Utc::now()) })
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Collects events published to a listener.
pub struct Recorder<E> {
    events: Arc<Mutex<Vec<E>>>,
}

impl<E: Clone + Send + 'static> Recorder<E> {
    pub fn new() -> Self {
        Self { events: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn listener(&self) -> impl Fn(&E) + Send + Sync + 'static {
        let events = self.events.clone();
        move |event: &E| events.lock().unwrap().push(event.clone())
    }

    pub fn events(&self) -> Vec<E> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&E) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|event| predicate(event)).count()
    }
}

/// Short names for counting lease events.
pub fn is_created(event: &SecretLeaseEvent) -> bool {
    matches!(event, SecretLeaseEvent::Created { .. })
}

pub fn is_renewed(event: &SecretLeaseEvent) -> bool {
    matches!(event, SecretLeaseEvent::AfterRenewed { .. })
}

pub fn is_expired(event: &SecretLeaseEvent) -> bool {
    matches!(event, SecretLeaseEvent::Expired { .. })
}

pub fn is_revoked(event: &SecretLeaseEvent) -> bool {
    matches!(event, SecretLeaseEvent::AfterRevocation { .. })
}

pub fn is_io_error(error: &SecretLeaseError) -> bool {
    error.error.is_io()
}
