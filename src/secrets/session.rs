//! Session token lifecycle: login, background refresh, and revocation.
//!
//! [`SessionManager`] logs in lazily on the first [`SessionManager::session_token`]
//! call and then keeps the token fresh with a one-shot refresh timer that fires
//! `refresh_before_expiry` ahead of the token's expiry. Renewable tokens are
//! renewed in place; others trigger a fresh login.
//!
//! Readers never receive a token with less than `expiry_threshold` of validity
//! left (measured against the injected [`Clock`]). If the background refresh fell
//! behind, because the host slept or the clock jumped, the reader logs in
//! synchronously. Concurrent readers share one login.
//!
//! A failed refresh is logged and published as
//! [`AuthenticationEvent::RefreshFailed`]; the current token is kept and the next
//! reader that finds it expired logs in again.
//!
//! A renewal that comes back with less than `expiry_threshold` of validity means
//! the token hit its maximum TTL. It is published as
//! [`AuthenticationEvent::Expired`] and replaced by a fresh login instead of being
//! renewed again. Tokens that are born below the threshold get no refresh timer.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::error::{Result, SecretsError};
use super::events::{ListenerId, ListenerRegistry};
use super::operations::{ClientAuthentication, SessionTokenSource, TokenOperations};
use super::types::{LoginToken, VaultToken};
use crate::observability::LeaseMetrics;
use async_trait::async_trait;

/// Default lead time of the background refresh.
pub const DEFAULT_REFRESH_BEFORE_EXPIRY: Duration = Duration::from_secs(5);

/// Default minimum validity a token must have to be handed out.
pub const DEFAULT_TOKEN_EXPIRY_THRESHOLD: Duration = Duration::from_secs(7);

/// Source of wall-clock time for token validity checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub refresh_before_expiry: Duration,
    pub expiry_threshold: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            refresh_before_expiry: DEFAULT_REFRESH_BEFORE_EXPIRY,
            expiry_threshold: DEFAULT_TOKEN_EXPIRY_THRESHOLD,
        }
    }
}

/// Something that happened to the session token.
#[derive(Debug, Clone)]
pub enum AuthenticationEvent {
    /// A new token was obtained by logging in. `None` means it never expires.
    LoggedIn { expires_at: Option<DateTime<Utc>> },
    /// The current token was renewed.
    Renewed { expires_at: Option<DateTime<Utc>> },
    /// Renewing no longer extends the token past the expiry threshold.
    Expired { expires_at: Option<DateTime<Utc>> },
    /// A background refresh failed; the previous token is kept.
    RefreshFailed { error: Arc<SecretsError> },
    /// The token was revoked.
    Revoked,
}

struct Installed {
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct TokenState {
    token: VaultToken,
    expires_at: Option<DateTime<Utc>>,
    renewable: bool,
    generation: u64,
}

struct SessionInner {
    authentication: Arc<dyn ClientAuthentication>,
    token_operations: Arc<dyn TokenOperations>,
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
    state: RwLock<Option<TokenState>>,
    login_lock: tokio::sync::Mutex<()>,
    refresh_timer: Mutex<Option<CancellationToken>>,
    next_generation: AtomicU64,
    listeners: ListenerRegistry<AuthenticationEvent>,
    metrics: LeaseMetrics,
}

/// Owns the session token and keeps it valid.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("method", &self.inner.authentication.method())
            .field("settings", &self.inner.settings)
            .field("expires_at", &self.expires_at())
            .finish()
    }
}

impl SessionManager {
    pub fn new(
        authentication: Arc<dyn ClientAuthentication>,
        token_operations: Arc<dyn TokenOperations>,
        settings: SessionSettings,
    ) -> Self {
        Self::with_clock(authentication, token_operations, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        authentication: Arc<dyn ClientAuthentication>,
        token_operations: Arc<dyn TokenOperations>,
        settings: SessionSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                authentication,
                token_operations,
                clock,
                settings,
                state: RwLock::new(None),
                login_lock: tokio::sync::Mutex::new(()),
                refresh_timer: Mutex::new(None),
                next_generation: AtomicU64::new(0),
                listeners: ListenerRegistry::new(),
                metrics: LeaseMetrics::new(),
            }),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    /// A token with at least `expiry_threshold` of validity left.
    ///
    /// Logs in first when there is no such token. Concurrent callers share a
    /// single login.
    pub async fn session_token(&self) -> Result<VaultToken> {
        if let Some(token) = self.inner.valid_token() {
            return Ok(token);
        }

        let _login = self.inner.login_lock.lock().await;
        if let Some(token) = self.inner.valid_token() {
            return Ok(token);
        }
        debug!("No valid session token, logging in");
        self.inner.login().await
    }

    /// Expiry of the current token. `None` when logged out or when the token never expires.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().as_ref().and_then(|state| state.expires_at)
    }

    pub fn is_logged_in(&self) -> bool {
        self.inner.read().is_some()
    }

    /// Whether a background refresh is pending.
    pub fn is_refresh_scheduled(&self) -> bool {
        self.inner.timer().as_ref().is_some_and(|timer| !timer.is_cancelled())
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&AuthenticationEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Cancel the refresh timer and revoke the token if this manager obtained it.
    ///
    /// Failures are logged and never returned.
    pub async fn revoke(&self) {
        let _login = self.inner.login_lock.lock().await;
        self.inner.cancel_refresh();

        let previous = self.inner.state.write().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        let Some(previous) = previous else {
            return;
        };

        if !self.inner.authentication.owns_token() {
            debug!("Session token was supplied externally, not revoking");
            return;
        }

        match self.inner.token_operations.revoke_self(&previous.token).await {
            Ok(()) => {
                info!("Revoked session token");
                self.inner.listeners.emit(&AuthenticationEvent::Revoked);
            }
            Err(e) => warn!(error = %e, "Failed to revoke session token"),
        }
    }

    pub async fn destroy(&self) {
        self.revoke().await;
    }
}

#[async_trait]
impl SessionTokenSource for SessionManager {
    async fn session_token(&self) -> Result<VaultToken> {
        SessionManager::session_token(self).await
    }
}

impl SessionInner {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<TokenState>> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn timer(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.refresh_timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remaining(&self, expires_at: DateTime<Utc>) -> Duration {
        (expires_at - self.clock.now()).to_std().unwrap_or(Duration::ZERO)
    }

    fn valid_token(&self) -> Option<VaultToken> {
        let state = self.read();
        let state = state.as_ref()?;
        match state.expires_at {
            None => Some(state.token.clone()),
            Some(expires_at) if self.remaining(expires_at) >= self.settings.expiry_threshold => {
                Some(state.token.clone())
            }
            Some(_) => None,
        }
    }

    fn cancel_refresh(&self) {
        if let Some(timer) = self.timer().take() {
            timer.cancel();
        }
    }

    /// Tokens without a reported TTL are looked up; a zero TTL means no expiry.
    async fn complete(&self, login: LoginToken) -> LoginToken {
        if !login.lease_duration().is_zero() {
            return login;
        }
        match self.token_operations.lookup_self(login.token()).await {
            Ok(lookup) => LoginToken::new(login.token().clone(), lookup.ttl, lookup.renewable),
            Err(e) => {
                warn!(error = %e, "Token lookup failed, treating token as non-expiring");
                login
            }
        }
    }

    async fn authenticate(&self) -> Result<LoginToken> {
        let method = self.authentication.method();
        match self.authentication.login().await {
            Ok(login) => {
                self.metrics.record_login(method, true);
                Ok(self.complete(login).await)
            }
            Err(e) => {
                self.metrics.record_login(method, false);
                warn!(method, error = %e, "Login failed");
                Err(e)
            }
        }
    }

    /// A renewal below the threshold means the token reached its maximum TTL.
    fn exhausted(&self, renewed: &LoginToken) -> bool {
        let ttl = renewed.lease_duration();
        !ttl.is_zero() && ttl < self.settings.expiry_threshold
    }

    async fn login(self: &Arc<Self>) -> Result<VaultToken> {
        let login = self.authenticate().await?;
        let token = login.token().clone();
        let expires_at = self.install(None, login).and_then(|installed| installed.expires_at);
        info!(method = self.authentication.method(), expires_at = ?expires_at, "Logged in");
        self.listeners.emit(&AuthenticationEvent::LoggedIn { expires_at });
        Ok(token)
    }

    /// Replace the token. With `expected`, only if the current generation still
    /// matches; returns `None` when it does not.
    fn install(self: &Arc<Self>, expected: Option<u64>, login: LoginToken) -> Option<Installed> {
        let ttl = login.lease_duration();
        let expires_at = (!ttl.is_zero())
            .then(|| chrono::Duration::from_std(ttl).ok().map(|ttl| self.clock.now() + ttl))
            .flatten();
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut state = self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            let current = state.as_ref().map(|state| state.generation);
            if expected.is_some() && current != expected {
                return None;
            }
            *state = Some(TokenState {
                token: login.token().clone(),
                expires_at,
                renewable: login.is_renewable(),
                generation,
            });
        }

        self.cancel_refresh();
        if expires_at.is_some() && ttl >= self.settings.expiry_threshold {
            self.schedule_refresh(generation, ttl.saturating_sub(self.settings.refresh_before_expiry));
        } else if expires_at.is_some() {
            debug!(ttl_secs = ttl.as_secs(), "Token validity is below the expiry threshold, not scheduling refresh");
        }
        Some(Installed { expires_at })
    }

    fn schedule_refresh(self: &Arc<Self>, generation: u64, delay: Duration) {
        let timer = CancellationToken::new();
        if let Some(previous) = self.timer().replace(timer.clone()) {
            previous.cancel();
        }
        debug!(generation, delay_secs = delay.as_secs(), "Scheduled session refresh");

        let span = crate::lease_span!("session_refresh", generation = generation);
        let session: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(
            async move {
                tokio::select! {
                    _ = timer.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                if let Some(session) = session.upgrade() {
                    session.refresh(generation).await;
                }
            }
            .instrument(span),
        );
    }

    async fn refresh(self: &Arc<Self>, generation: u64) {
        let _login = self.login_lock.lock().await;
        let current = self.read().clone();
        let Some(current) = current.filter(|state| state.generation == generation) else {
            debug!(generation, "Session token has changed, skipping refresh");
            return;
        };

        let refreshed = if current.renewable {
            match self.token_operations.renew_self(&current.token).await {
                Ok(renewed) if self.exhausted(&renewed) => {
                    info!(
                        ttl_secs = renewed.lease_duration().as_secs(),
                        "Session token reached its maximum TTL, logging in again"
                    );
                    self.listeners.emit(&AuthenticationEvent::Expired { expires_at: current.expires_at });
                    self.authenticate().await.map(|login| (login, false))
                }
                other => other.map(|renewed| (renewed, true)),
            }
        } else {
            self.authenticate().await.map(|login| (login, false))
        };

        match refreshed {
            Ok((login, renewed)) => {
                self.metrics.record_session_refresh(true);
                let Some(Installed { expires_at }) = self.install(Some(generation), login) else {
                    debug!(generation, "Session was replaced during refresh");
                    return;
                };
                info!(renewed, expires_at = ?expires_at, "Refreshed session token");
                let event = if renewed {
                    AuthenticationEvent::Renewed { expires_at }
                } else {
                    AuthenticationEvent::LoggedIn { expires_at }
                };
                self.listeners.emit(&event);
            }
            Err(e) => {
                self.metrics.record_session_refresh(false);
                self.cancel_refresh();
                warn!(error = %e, "Session refresh failed, keeping current token");
                self.listeners.emit(&AuthenticationEvent::RefreshFailed { error: Arc::new(e) });
            }
        }
    }
}
