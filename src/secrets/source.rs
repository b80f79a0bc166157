//! A read-only property map kept in sync with one leased secret.
//!
//! [`LeaseAwareSecretSource::bind`] registers a secret with a
//! [`SecretLeaseContainer`] and listens to its events. Every `Created` event
//! (initial fetch or rotation) replaces the map; renewals keep it. When a renewal
//! fails and the lease is dropped, reads keep returning the last good data.
//!
//! ```text
//! Uninitialized --fetch--> Active --renew/rotate--> Active
//!                            |  \--failure (dropped)--> Errored
//!                            \--revocation/close--> Revoked
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

use super::container::SecretLeaseContainer;
use super::error::{Result, SecretsError};
use super::events::{ListenerId, SecretLeaseError, SecretLeaseEvent};
use super::requested::RequestedSecret;
use super::strategy::LeaseStrategy;

/// Lifecycle of a bound secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Uninitialized,
    Active,
    Errored,
    Revoked,
}

/// Options for [`LeaseAwareSecretSource::bind`].
#[derive(Debug, Clone, Default)]
pub struct SourceOptions {
    /// Return the initial fetch error from `bind` instead of starting empty.
    pub fail_fast: bool,
    /// Prepended to every property name.
    pub prefix: Option<String>,
}

impl SourceOptions {
    pub fn fail_fast() -> Self {
        Self { fail_fast: true, prefix: None }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

struct SourceInner {
    requested: RequestedSecret,
    prefix: String,
    strategy: LeaseStrategy,
    properties: RwLock<BTreeMap<String, String>>,
    state: RwLock<SourceState>,
}

impl SourceInner {
    fn set_state(&self, state: SourceState) {
        *self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    fn state(&self) -> SourceState {
        *self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn prefixed(&self, data: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        data.iter().map(|(key, value)| (format!("{}{}", self.prefix, key), value.clone())).collect()
    }

    /// Fill a source that has not seen any data yet.
    fn seed(&self, data: &BTreeMap<String, String>) {
        let mut state = self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        // A `Created` event delivered since the listener was added is newer
        if *state != SourceState::Uninitialized {
            return;
        }
        *self.properties.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = self.prefixed(data);
        *state = SourceState::Active;
    }

    fn on_lease_event(&self, event: &SecretLeaseEvent) {
        if event.requested() != &self.requested {
            return;
        }
        match event {
            SecretLeaseEvent::Created { data, .. } => {
                let properties = self.prefixed(data);
                debug!(requested = %self.requested, keys = properties.len(), "Refreshed secret properties");
                *self.properties.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = properties;
                self.set_state(SourceState::Active);
            }
            SecretLeaseEvent::AfterRenewed { .. } => {
                if self.state() == SourceState::Errored {
                    self.set_state(SourceState::Active);
                }
            }
            SecretLeaseEvent::BeforeRevocation { .. } | SecretLeaseEvent::AfterRevocation { .. } => {
                self.set_state(SourceState::Revoked);
            }
            SecretLeaseEvent::Expired { .. } | SecretLeaseEvent::NotFound { .. } => {}
        }
    }

    fn on_error(&self, error: &SecretLeaseError) {
        if error.requested != self.requested {
            return;
        }
        if self.state() == SourceState::Active && self.strategy.should_drop(&error.error) {
            warn!(
                requested = %self.requested,
                error = %error.error,
                "Secret lease failed, serving last known data"
            );
            self.set_state(SourceState::Errored);
        }
    }
}

/// Captures the first error for one secret while it is being registered.
///
/// The listener is removed when the guard is dropped, so errors raised after the
/// registration window never reach it.
struct ErrorCapture {
    container: SecretLeaseContainer,
    listener: ListenerId,
    first: Arc<Mutex<Option<Arc<SecretsError>>>>,
}

impl ErrorCapture {
    fn register(container: &SecretLeaseContainer, requested: &RequestedSecret) -> Self {
        let first: Arc<Mutex<Option<Arc<SecretsError>>>> = Arc::new(Mutex::new(None));
        let slot = first.clone();
        let requested = requested.clone();
        let listener = container.add_error_listener(move |error| {
            if error.requested == requested {
                let mut slot = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                slot.get_or_insert_with(|| error.error.clone());
            }
        });
        Self { container: container.clone(), listener, first }
    }

    fn take(self) -> Option<SecretsError> {
        let first = self.first.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        first.map(|error| Arc::try_unwrap(error).unwrap_or_else(|shared| shared.replicate()))
    }
}

impl Drop for ErrorCapture {
    fn drop(&mut self) {
        self.container.remove_error_listener(self.listener);
    }
}

/// Property view of one requested secret, refreshed by lease events.
pub struct LeaseAwareSecretSource {
    inner: Arc<SourceInner>,
    container: SecretLeaseContainer,
    lease_listener: ListenerId,
    error_listener: ListenerId,
}

impl std::fmt::Debug for LeaseAwareSecretSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseAwareSecretSource")
            .field("requested", &self.inner.requested)
            .field("state", &self.inner.state())
            .field("properties", &self.property_names())
            .finish()
    }
}

impl LeaseAwareSecretSource {
    /// Register `requested` with `container` and fetch it.
    ///
    /// Starts the container if it is not running yet. A secret that is already
    /// registered is not fetched again when the container holds its data; the
    /// source starts out with that data. With [`SourceOptions::fail_fast`], a
    /// failure of the initial fetch is returned and a registration made by this
    /// call is undone; otherwise the failure is logged and the source starts out
    /// empty.
    pub async fn bind(
        container: &SecretLeaseContainer,
        requested: RequestedSecret,
        options: SourceOptions,
    ) -> Result<Self> {
        let inner = Arc::new(SourceInner {
            requested: requested.clone(),
            prefix: options.prefix.unwrap_or_default(),
            strategy: container.settings().strategy,
            properties: RwLock::new(BTreeMap::new()),
            state: RwLock::new(SourceState::Uninitialized),
        });

        let events = inner.clone();
        let lease_listener = container.add_lease_listener(move |event| events.on_lease_event(event));
        let errors = inner.clone();
        let error_listener = container.add_error_listener(move |error| errors.on_error(error));
        let source = Self { inner, container: container.clone(), lease_listener, error_listener };

        let capture = ErrorCapture::register(container, &requested);
        let added = container.add_requested_secret(requested.clone()).await;
        if !container.is_started() {
            container.start().await;
        } else if !added {
            match container.secret_data(&requested) {
                Some(data) => source.inner.seed(&data),
                // Registered, but nothing fetched yet or the lease expired
                None => {
                    let _ = container.rotate(&requested).await;
                }
            }
        }
        let initial_error = capture.take();

        match initial_error {
            Some(error) if options.fail_fast => {
                if added {
                    container.remove_requested_secret(&requested).await;
                }
                return Err(error);
            }
            Some(error) => {
                warn!(requested = %requested, error = %error, "Initial secret fetch failed, properties are empty");
            }
            None => {
                info!(requested = %requested, keys = source.len(), "Bound secret");
            }
        }
        Ok(source)
    }

    pub fn requested(&self) -> &RequestedSecret {
        &self.inner.requested
    }

    pub fn state(&self) -> SourceState {
        self.inner.state()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.read().get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// Snapshot of every property.
    pub fn properties(&self) -> BTreeMap<String, String> {
        self.read().clone()
    }

    pub fn property_names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Stop following lease events. The last data stays readable.
    pub fn close(&self) {
        self.container.remove_lease_listener(self.lease_listener);
        self.container.remove_error_listener(self.error_listener);
        if self.inner.state() != SourceState::Uninitialized {
            self.inner.set_state(SourceState::Revoked);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, String>> {
        self.inner.properties.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for LeaseAwareSecretSource {
    fn drop(&mut self) {
        self.container.remove_lease_listener(self.lease_listener);
        self.container.remove_error_listener(self.error_listener);
    }
}
