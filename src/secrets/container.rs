//! Registry of requested secrets and their lease lineages.
//!
//! The container owns one [`LeaseRenewalScheduler`] per [`RequestedSecret`], fetches
//! secrets when started, keeps their leases alive, and revokes them on
//! [`SecretLeaseContainer::destroy`]. Everything that happens is published to lease
//! listeners ([`SecretLeaseEvent`]) and error listeners ([`SecretLeaseError`]).
//!
//! # Renewal Modes
//!
//! - **Renew**: the lease is renewed until the store stops extending it (the renewed
//!   duration falls below the expiry threshold), then an `Expired` event is published
//!   and the lineage goes dormant.
//! - **Rotate**: same as renew, but instead of expiring the secret is fetched again
//!   and a new `Created` event carries the fresh data. Secrets without a lease id but
//!   with a TTL are rotated when the TTL is about to run out.
//!
//! # Example
//!
//! ```rust,ignore
//! use vault_lease::secrets::{LeaseSettings, SecretLeaseContainer, SecretLeaseEvent};
//!
//! let container = SecretLeaseContainer::new(operations, LeaseSettings::default());
//! container.add_lease_listener(|event| {
//!     if let SecretLeaseEvent::Created { requested, data, .. } = event {
//!         tracing::info!(path = %requested.path(), keys = data.len(), "Secret refreshed");
//!     }
//! });
//! container.request_rotating_secret("database/creds/readonly").await;
//! container.start().await;
//! ```

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::{Result, SecretsError};
use super::events::{ListenerId, ListenerRegistry, SecretLeaseError, SecretLeaseEvent};
use super::lease::Lease;
use super::operations::LeaseOperations;
use super::requested::RequestedSecret;
use super::scheduler::{
    LeaseRenewalScheduler, RenewLease, DEFAULT_EXPIRY_THRESHOLD, DEFAULT_MIN_RENEWAL,
};
use super::strategy::LeaseStrategy;
use crate::observability::LeaseMetrics;

/// Renewal timing and failure policy shared by every lineage of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseSettings {
    pub min_renewal: Duration,
    pub expiry_threshold: Duration,
    pub strategy: LeaseStrategy,
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            min_renewal: DEFAULT_MIN_RENEWAL,
            expiry_threshold: DEFAULT_EXPIRY_THRESHOLD,
            strategy: LeaseStrategy::default(),
        }
    }
}

struct ContainerInner {
    operations: Arc<dyn LeaseOperations>,
    settings: LeaseSettings,
    lineages: DashMap<RequestedSecret, LeaseRenewalScheduler>,
    data: DashMap<RequestedSecret, BTreeMap<String, String>>,
    lease_listeners: ListenerRegistry<SecretLeaseEvent>,
    error_listeners: ListenerRegistry<SecretLeaseError>,
    started: AtomicBool,
    metrics: LeaseMetrics,
}

/// Keeps requested secrets fetched, renewed, rotated, and finally revoked.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct SecretLeaseContainer {
    inner: Arc<ContainerInner>,
}

impl std::fmt::Debug for SecretLeaseContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretLeaseContainer")
            .field("settings", &self.inner.settings)
            .field("lineages", &self.inner.lineages.len())
            .field("started", &self.is_started())
            .finish()
    }
}

impl SecretLeaseContainer {
    pub fn new(operations: Arc<dyn LeaseOperations>, settings: LeaseSettings) -> Self {
        Self {
            inner: Arc::new(ContainerInner {
                operations,
                settings,
                lineages: DashMap::new(),
                data: DashMap::new(),
                lease_listeners: ListenerRegistry::new(),
                error_listeners: ListenerRegistry::new(),
                started: AtomicBool::new(false),
                metrics: LeaseMetrics::new(),
            }),
        }
    }

    pub fn settings(&self) -> &LeaseSettings {
        &self.inner.settings
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub fn add_lease_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SecretLeaseEvent) + Send + Sync + 'static,
    {
        self.inner.lease_listeners.add(listener)
    }

    pub fn remove_lease_listener(&self, id: ListenerId) -> bool {
        self.inner.lease_listeners.remove(id)
    }

    pub fn add_error_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SecretLeaseError) + Send + Sync + 'static,
    {
        self.inner.error_listeners.add(listener)
    }

    pub fn remove_error_listener(&self, id: ListenerId) -> bool {
        self.inner.error_listeners.remove(id)
    }

    /// Register a secret whose lease is renewed until it expires.
    pub async fn request_renewable_secret(&self, path: impl Into<String>) -> RequestedSecret {
        let requested = RequestedSecret::renewable(path);
        self.add_requested_secret(requested.clone()).await;
        requested
    }

    /// Register a secret that is fetched again before its lease runs out.
    pub async fn request_rotating_secret(&self, path: impl Into<String>) -> RequestedSecret {
        let requested = RequestedSecret::rotating(path);
        self.add_requested_secret(requested.clone()).await;
        requested
    }

    /// Register `requested`. A started container fetches it right away.
    ///
    /// Returns `false` when the secret was already registered; nothing is fetched
    /// then. Fetch failures are reported to the error listeners only.
    pub async fn add_requested_secret(&self, requested: RequestedSecret) -> bool {
        let added = match self.inner.lineages.entry(requested.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(LeaseRenewalScheduler::new(requested.to_string(), self.inner.settings.strategy));
                true
            }
        };

        if !added {
            debug!(requested = %requested, "Secret already registered");
        } else if self.is_started() {
            let _ = self.inner.fetch_and_schedule(&requested).await;
        }
        added
    }

    /// Stop tracking `requested` and revoke its lease.
    ///
    /// Returns `false` when the secret was not registered.
    pub async fn remove_requested_secret(&self, requested: &RequestedSecret) -> bool {
        let Some((_, scheduler)) = self.inner.lineages.remove(requested) else {
            return false;
        };
        self.inner.data.remove(requested);
        if let Some(lease) = scheduler.disable_schedule_renewal() {
            self.inner.revoke_if_revocable(requested, lease).await;
        }
        debug!(requested = %requested, "Removed requested secret");
        true
    }

    /// Fetch every registered secret and start renewing their leases.
    ///
    /// Idempotent. Failures are reported to the error listeners.
    pub async fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let requested: Vec<RequestedSecret> =
            self.inner.lineages.iter().map(|entry| entry.key().clone()).collect();
        info!(secrets = requested.len(), "Starting secret lease container");

        let fetches = requested.iter().map(|requested| self.inner.fetch_and_schedule(requested));
        join_all(fetches).await;
    }

    /// The lineage's current lease, if any.
    pub fn current_lease(&self, requested: &RequestedSecret) -> Option<Lease> {
        self.inner.lineages.get(requested).and_then(|scheduler| scheduler.current_lease())
    }

    pub fn requested_secrets(&self) -> Vec<RequestedSecret> {
        self.inner.lineages.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Data published by the lineage's latest `Created` event.
    ///
    /// `None` before the first successful fetch and after the lease expired.
    pub fn secret_data(&self, requested: &RequestedSecret) -> Option<BTreeMap<String, String>> {
        self.inner.data.get(requested).map(|data| data.value().clone())
    }

    /// Renew the lineage's current lease now and reschedule from the result.
    ///
    /// Follows the same rules as a scheduled renewal: a lease that is not extended
    /// past the expiry threshold is rotated (rotating secrets) or expires, in which
    /// case an empty lease is returned.
    pub async fn renew(&self, requested: &RequestedSecret) -> Result<Lease> {
        let lease = self
            .inner
            .scheduler(requested)?
            .current_lease()
            .filter(|lease| lease.has_lease_id())
            .ok_or_else(|| SecretsError::invalid_argument(format!("No lease to renew for {}", requested)))?;

        let renewed = self.inner.renew_or_rotate(requested, &lease).await?;
        self.inner.schedule(requested, renewed.clone());
        Ok(renewed)
    }

    /// Fetch the secret again, replacing its lease and publishing fresh data.
    pub async fn rotate(&self, requested: &RequestedSecret) -> Result<Lease> {
        self.inner.scheduler(requested)?;
        if !self.is_started() {
            return Err(SecretsError::invalid_argument(format!(
                "Container is not running, cannot rotate {}",
                requested
            )));
        }
        self.inner.rotate_lineage(requested).await
    }

    /// Stop all renewals and revoke every renewable lease.
    ///
    /// Revocations run concurrently; each failure is logged and reported to the
    /// error listeners without affecting the others. Never fails.
    pub async fn destroy(&self) {
        self.inner.started.store(false, Ordering::SeqCst);

        let leases: Vec<(RequestedSecret, Lease)> = self
            .inner
            .lineages
            .iter()
            .filter_map(|entry| entry.value().disable_schedule_renewal().map(|lease| (entry.key().clone(), lease)))
            .collect();
        self.inner.data.clear();
        self.inner.metrics.set_active_leases(0);

        let revocations = leases
            .into_iter()
            .filter(|(_, lease)| lease.has_lease_id() && lease.is_renewable())
            .map(|(requested, lease)| {
                let inner = self.inner.clone();
                async move { inner.revoke_lease(&requested, lease).await }
            });
        let revoked = join_all(revocations).await.len();

        info!(revoked, "Secret lease container destroyed");
    }
}

impl ContainerInner {
    fn scheduler(&self, requested: &RequestedSecret) -> Result<LeaseRenewalScheduler> {
        self.lineages
            .get(requested)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SecretsError::invalid_argument(format!("Secret is not registered: {}", requested)))
    }

    /// Publish an error event and hand the error back to the caller.
    fn report(&self, requested: &RequestedSecret, lease: Lease, error: SecretsError) -> SecretsError {
        let shared = Arc::new(error);
        self.error_listeners.emit(&SecretLeaseError {
            requested: requested.clone(),
            lease,
            error: shared.clone(),
        });
        Arc::try_unwrap(shared).unwrap_or_else(|shared| shared.replicate())
    }

    async fn fetch_and_schedule(self: &Arc<Self>, requested: &RequestedSecret) -> Result<Lease> {
        let response = match self.operations.fetch(requested.path()).await {
            Ok(response) => response,
            Err(e) => {
                if e.is_not_found() {
                    info!(path = %requested.path(), "Secret not found");
                    self.lease_listeners.emit(&SecretLeaseEvent::NotFound { requested: requested.clone() });
                } else {
                    warn!(path = %requested.path(), error = %e, "Failed to fetch secret");
                }
                return Err(self.report(requested, Lease::none(), e));
            }
        };

        let lease = Lease::from_response(&response);
        if !self.started.load(Ordering::SeqCst) {
            info!(path = %requested.path(), lease_id = %lease.lease_id(), "Container stopped during fetch, revoking lease");
            self.revoke_if_revocable(requested, lease).await;
            return Ok(Lease::none());
        }

        let data = response.flattened_data();
        info!(
            path = %requested.path(),
            lease_id = %lease.lease_id(),
            lease_duration_secs = lease.lease_duration().as_secs(),
            renewable = lease.is_renewable(),
            keys = data.len(),
            "Fetched secret"
        );

        self.data.insert(requested.clone(), data.clone());
        self.lease_listeners.emit(&SecretLeaseEvent::Created {
            requested: requested.clone(),
            lease: lease.clone(),
            data,
        });
        if !self.schedule(requested, lease.clone()) {
            self.revoke_if_revocable(requested, lease.clone()).await;
        }
        Ok(lease)
    }

    fn is_schedulable(&self, requested: &RequestedSecret, lease: &Lease) -> bool {
        let renewable = lease.has_lease_id() && lease.is_renewable();
        renewable || (requested.is_rotating() && !lease.lease_duration().is_zero())
    }

    /// Install `lease` as the lineage's current lease.
    ///
    /// Returns `false` when the lineage is gone or the container stopped; the lease
    /// is then owned by nobody and must be revoked by the caller.
    fn schedule(self: &Arc<Self>, requested: &RequestedSecret, lease: Lease) -> bool {
        let Ok(scheduler) = self.scheduler(requested) else {
            return false;
        };
        if !self.started.load(Ordering::SeqCst) {
            debug!(requested = %requested, "Container is not running, not scheduling renewal");
            return false;
        }

        if self.is_schedulable(requested, &lease) {
            let renew: Arc<dyn RenewLease> =
                Arc::new(LineageRenewal { container: Arc::downgrade(self), requested: requested.clone() });
            scheduler.schedule_renewal(
                renew,
                lease,
                self.settings.min_renewal,
                self.settings.expiry_threshold,
            );
            // A destroy racing this call may have collected the lineage before the
            // new lease was installed. Whoever takes the lease out revokes it.
            if !self.started.load(Ordering::SeqCst) && scheduler.disable_schedule_renewal().is_some() {
                return false;
            }
        } else {
            debug!(requested = %requested, lease_id = %lease.lease_id(), "Lease is not renewable, not scheduling renewal");
            scheduler.disable_schedule_renewal();
        }

        let active = self.lineages.iter().filter(|entry| entry.value().is_active()).count();
        self.metrics.set_active_leases(active);
        true
    }

    async fn renew_lease(&self, requested: &RequestedSecret, lease: &Lease) -> Result<Lease> {
        let mode = requested.mode().as_str();
        match self.operations.renew(lease, Some(lease.lease_duration())).await {
            Ok(renewed) => {
                self.metrics.record_renewal(mode, true);
                debug!(
                    lease_id = %renewed.lease_id(),
                    lease_duration_secs = renewed.lease_duration().as_secs(),
                    "Renewed lease"
                );
                if renewed.has_lease_id() {
                    self.lease_listeners.emit(&SecretLeaseEvent::AfterRenewed {
                        requested: requested.clone(),
                        lease: renewed.clone(),
                    });
                }
                Ok(renewed)
            }
            Err(e) => {
                self.metrics.record_renewal(mode, false);
                warn!(lease_id = %lease.lease_id(), error = %e, "Failed to renew lease");
                Err(self.report(requested, lease.clone(), e))
            }
        }
    }

    async fn rotate_lineage(self: &Arc<Self>, requested: &RequestedSecret) -> Result<Lease> {
        info!(path = %requested.path(), "Rotating secret");
        let result = self.fetch_and_schedule(requested).await;
        self.metrics.record_rotation(result.is_ok());
        result
    }

    /// Renew, or rotate when the lease can no longer be extended far enough.
    async fn renew_or_rotate(self: &Arc<Self>, requested: &RequestedSecret, lease: &Lease) -> Result<Lease> {
        if requested.is_rotating() && !(lease.has_lease_id() && lease.is_renewable()) {
            return self.rotate_lineage(requested).await;
        }

        let renewed = self.renew_lease(requested, lease).await?;
        if !renewed.has_lease_id() || renewed.lease_duration() >= self.settings.expiry_threshold {
            return Ok(renewed);
        }

        if requested.is_rotating() {
            return self.rotate_lineage(requested).await;
        }

        info!(
            lease_id = %renewed.lease_id(),
            lease_duration_secs = renewed.lease_duration().as_secs(),
            "Lease reached its maximum TTL and expires"
        );
        self.data.remove(requested);
        self.lease_listeners.emit(&SecretLeaseEvent::Expired { requested: requested.clone(), lease: renewed });
        Ok(Lease::none())
    }

    async fn revoke_if_revocable(&self, requested: &RequestedSecret, lease: Lease) {
        if lease.has_lease_id() && lease.is_renewable() {
            self.revoke_lease(requested, lease).await;
        }
    }

    async fn revoke_lease(&self, requested: &RequestedSecret, lease: Lease) {
        self.lease_listeners.emit(&SecretLeaseEvent::BeforeRevocation {
            requested: requested.clone(),
            lease: lease.clone(),
        });

        match self.operations.revoke(&lease).await {
            Ok(()) => {
                self.metrics.record_revocation(true);
                info!(lease_id = %lease.lease_id(), "Revoked lease");
                self.lease_listeners.emit(&SecretLeaseEvent::AfterRevocation {
                    requested: requested.clone(),
                    lease,
                });
            }
            Err(e) => {
                self.metrics.record_revocation(false);
                warn!(lease_id = %lease.lease_id(), error = %e, "Failed to revoke lease");
                self.report(requested, lease, e);
            }
        }
    }
}

/// The renew capability the container hands to each lineage's scheduler.
struct LineageRenewal {
    container: Weak<ContainerInner>,
    requested: RequestedSecret,
}

#[async_trait]
impl RenewLease for LineageRenewal {
    async fn renew(&self, lease: &Lease) -> Result<Lease> {
        match self.container.upgrade() {
            Some(container) => container.renew_or_rotate(&self.requested, lease).await,
            None => Ok(Lease::none()),
        }
    }
}
